//! Context commands (saved defaults for API URL and owner).

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use slotq_id::OwnerId;

use crate::output::{print_single, print_success, OutputFormat};

use super::CommandContext;

/// Manage saved CLI context (API URL, default owner).
#[derive(Debug, Args)]
pub struct ContextCommand {
    #[command(subcommand)]
    command: ContextSubcommand,
}

#[derive(Debug, Subcommand)]
enum ContextSubcommand {
    /// Show the saved context.
    Show,

    /// Update the saved context.
    Set(SetContextArgs),

    /// Clear the saved context.
    Clear,
}

#[derive(Debug, Args)]
struct SetContextArgs {
    /// Default owner ID for owner-scoped commands.
    #[arg(long)]
    owner: Option<String>,

    /// API endpoint URL.
    #[arg(long)]
    api_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContextView {
    api_url: String,
    owner: Option<String>,
}

impl ContextCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            ContextSubcommand::Show => show(ctx).await,
            ContextSubcommand::Set(args) => set(ctx, args).await,
            ContextSubcommand::Clear => clear(ctx).await,
        }
    }
}

async fn show(ctx: CommandContext) -> Result<()> {
    let view = ContextView {
        api_url: ctx.config.api_url.clone(),
        owner: ctx.config.context.owner.clone(),
    };

    match ctx.format {
        OutputFormat::Json => print_single(&view, ctx.format),
        OutputFormat::Table => {
            println!("api_url: {}", view.api_url);
            println!("owner: {}", view.owner.as_deref().unwrap_or("-"));
        }
    }

    Ok(())
}

async fn set(mut ctx: CommandContext, args: SetContextArgs) -> Result<()> {
    if args.owner.is_none() && args.api_url.is_none() {
        return Err(anyhow::anyhow!("Nothing to set. Pass --owner or --api-url."));
    }

    if let Some(owner) = args.owner {
        // Reject malformed IDs before they end up saved.
        owner
            .parse::<OwnerId>()
            .map_err(|e| anyhow::anyhow!("Invalid owner ID {owner:?}: {e}"))?;
        ctx.config.context.owner = Some(owner);
    }
    if let Some(api_url) = args.api_url {
        ctx.config.api_url = api_url;
    }
    ctx.config.save()?;

    match ctx.format {
        OutputFormat::Json => print_single(&serde_json::json!({ "ok": true }), ctx.format),
        OutputFormat::Table => print_success("Saved context"),
    }

    Ok(())
}

async fn clear(mut ctx: CommandContext) -> Result<()> {
    ctx.config.context.owner = None;
    ctx.config.save()?;

    match ctx.format {
        OutputFormat::Json => print_single(&serde_json::json!({ "ok": true }), ctx.format),
        OutputFormat::Table => print_success("Cleared saved context"),
    }

    Ok(())
}
