//! Token commands: booking, emergency insertion, cancellation.

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use slotq_id::TokenId;
use tabled::Tabled;

use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Token commands.
#[derive(Debug, Args)]
pub struct TokensCommand {
    #[command(subcommand)]
    command: TokensSubcommand,
}

#[derive(Debug, Subcommand)]
enum TokensSubcommand {
    /// Book a token into the owner's chain.
    Book(BookArgs),

    /// Insert an emergency token at the front of the owner's chain.
    Emergency(EmergencyArgs),

    /// Cancel a token, promoting the best waiting token into the seat.
    Cancel(CancelArgs),

    /// Get token details.
    Get(GetArgs),

    /// List the owner's tokens, newest first.
    List,
}

#[derive(Debug, Args)]
struct BookArgs {
    /// Who the token is for.
    patient: String,

    /// Token kind.
    #[arg(long, value_enum)]
    kind: KindArg,
}

#[derive(Debug, Args)]
struct EmergencyArgs {
    /// Who the token is for.
    patient: String,
}

#[derive(Debug, Args)]
struct CancelArgs {
    /// Token ID.
    token_id: String,
}

#[derive(Debug, Args)]
struct GetArgs {
    /// Token ID.
    token_id: String,
}

/// Bookable token kinds. Emergencies have their own subcommand.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Priority,
    Followup,
    Online,
    Walkin,
}

impl KindArg {
    fn as_wire(self) -> &'static str {
        match self {
            KindArg::Priority => "PRIORITY",
            KindArg::Followup => "FOLLOWUP",
            KindArg::Online => "ONLINE",
            KindArg::Walkin => "WALKIN",
        }
    }
}

impl TokensCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            TokensSubcommand::Book(args) => book(ctx, args).await,
            TokensSubcommand::Emergency(args) => emergency(ctx, args).await,
            TokensSubcommand::Cancel(args) => cancel(ctx, args).await,
            TokensSubcommand::Get(args) => get(ctx, args).await,
            TokensSubcommand::List => list(ctx).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct BookRequest {
    patient: String,
    owner_id: String,
    kind: String,
}

#[derive(Debug, Serialize)]
struct EmergencyRequest {
    patient: String,
    owner_id: String,
}

/// Token response from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenResponse {
    id: String,
    patient: String,
    owner_id: String,
    #[serde(default)]
    slot_id: Option<String>,
    kind: String,
    priority: f64,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TokenResponse {
    fn describe_seat(&self) -> String {
        match &self.slot_id {
            Some(slot_id) => format!("seated in {slot_id}"),
            None => "on the waitlist".to_string(),
        }
    }
}

/// A token row in owner-scoped listings.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct TokenRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Patient")]
    patient: String,

    #[tabled(rename = "Kind")]
    kind: String,

    #[tabled(rename = "Priority")]
    priority: f64,

    #[tabled(rename = "Status")]
    status: String,

    #[tabled(rename = "Slot")]
    #[tabled(display = "display_option")]
    #[serde(default)]
    slot_start: Option<String>,
}

fn display_option(opt: &Option<String>) -> String {
    opt.as_deref().unwrap_or("-").to_string()
}

#[derive(Debug, Deserialize)]
struct ListTokensResponse {
    items: Vec<TokenRow>,
}

async fn book(ctx: CommandContext, args: BookArgs) -> Result<()> {
    let owner_id = ctx.require_owner()?;
    let client = ctx.client()?;

    let request = BookRequest {
        patient: args.patient,
        owner_id: owner_id.to_string(),
        kind: args.kind.as_wire().to_string(),
    };
    let response: TokenResponse = client.post("/v1/tokens/book", &request).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Booked {} token {} for '{}': {} ({})",
                response.kind,
                response.id,
                response.patient,
                response.status,
                response.describe_seat()
            ));
        }
    }

    Ok(())
}

async fn emergency(ctx: CommandContext, args: EmergencyArgs) -> Result<()> {
    let owner_id = ctx.require_owner()?;
    let client = ctx.client()?;

    let request = EmergencyRequest {
        patient: args.patient,
        owner_id: owner_id.to_string(),
    };
    let response: TokenResponse = client.post("/v1/tokens/emergency", &request).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Inserted emergency token {} for '{}': {} ({})",
                response.id,
                response.patient,
                response.status,
                response.describe_seat()
            ));
        }
    }

    Ok(())
}

async fn cancel(ctx: CommandContext, args: CancelArgs) -> Result<()> {
    // Reject malformed IDs locally before the round trip.
    let token_id: TokenId = args
        .token_id
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid token ID {:?}: {e}", args.token_id))?;
    let client = ctx.client()?;

    let response: TokenResponse = client
        .post_empty(&format!("/v1/tokens/{token_id}/cancel"))
        .await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Cancelled token {} for '{}'",
                response.id, response.patient
            ));
        }
    }

    Ok(())
}

async fn get(ctx: CommandContext, args: GetArgs) -> Result<()> {
    let client = ctx.client()?;

    let response: TokenResponse = client
        .get(&format!("/v1/tokens/{}", args.token_id))
        .await
        .map_err(|e| match e {
            CliError::Api { status: 404, .. } => {
                CliError::NotFound(format!("Token '{}' not found", args.token_id))
            }
            other => other,
        })?;

    print_single(&response, ctx.format);
    Ok(())
}

async fn list(ctx: CommandContext) -> Result<()> {
    let owner_id = ctx.require_owner()?;
    let client = ctx.client()?;

    let response: ListTokensResponse =
        client.get(&format!("/v1/owners/{owner_id}/tokens")).await?;

    print_output(&response.items, ctx.format);
    Ok(())
}
