//! CLI commands.

mod context;
mod owners;
mod simulate;
mod slots;
mod tokens;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::config::Config;
use crate::output::OutputFormat;

/// slotq CLI - Manage owners, slot chains and allocation tokens.
#[derive(Debug, Parser)]
#[command(name = "slotq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Owner ID.
    #[arg(long, global = true, env = "SLOTQ_OWNER")]
    owner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show or change saved CLI context.
    Context(context::ContextCommand),

    /// Manage owners.
    Owners(owners::OwnersCommand),

    /// Manage an owner's slot chain.
    Slots(slots::SlotsCommand),

    /// Book, escalate and cancel tokens.
    Tokens(tokens::TokensCommand),

    /// Run a scripted demo day against the API.
    Simulate(simulate::SimulateCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        let config = Config::load()?;

        // Build context from flags and config
        let ctx = CommandContext {
            config,
            format,
            owner: self.owner,
        };

        match self.command {
            Commands::Context(cmd) => cmd.run(ctx).await,
            Commands::Owners(cmd) => cmd.run(ctx).await,
            Commands::Slots(cmd) => cmd.run(ctx).await,
            Commands::Tokens(cmd) => cmd.run(ctx).await,
            Commands::Simulate(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("slotq {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
    pub owner: Option<String>,
}

impl CommandContext {
    /// Get an API client.
    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.config)
    }

    /// Resolve the current owner, preferring flag over context.
    pub fn resolve_owner(&self) -> Option<&str> {
        self.owner
            .as_deref()
            .or(self.config.context.owner.as_deref())
    }

    /// Require an owner to be specified.
    pub fn require_owner(&self) -> Result<&str> {
        self.resolve_owner().ok_or_else(|| {
            anyhow::anyhow!("No owner specified. Use --owner or `slotq context set --owner`.")
        })
    }
}
