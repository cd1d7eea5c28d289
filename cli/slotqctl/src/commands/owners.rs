//! Owner commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Owner commands.
#[derive(Debug, Args)]
pub struct OwnersCommand {
    #[command(subcommand)]
    command: OwnersSubcommand,
}

#[derive(Debug, Subcommand)]
enum OwnersSubcommand {
    /// List owners.
    List,

    /// Create a new owner.
    Create(CreateOwnerArgs),

    /// Get owner details.
    Get(GetOwnerArgs),

    /// Show an owner's slot chain and token statistics.
    Summary(SummaryArgs),
}

#[derive(Debug, Args)]
struct CreateOwnerArgs {
    /// Owner display name.
    name: String,
}

#[derive(Debug, Args)]
struct GetOwnerArgs {
    /// Owner ID.
    owner_id: String,
}

#[derive(Debug, Args)]
struct SummaryArgs {
    /// Owner ID (defaults to the context owner).
    owner_id: Option<String>,
}

impl OwnersCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            OwnersSubcommand::List => list_owners(ctx).await,
            OwnersSubcommand::Create(args) => create_owner(ctx, args).await,
            OwnersSubcommand::Get(args) => get_owner(ctx, args).await,
            OwnersSubcommand::Summary(args) => owner_summary(ctx, args).await,
        }
    }
}

/// Owner response from API.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct OwnerResponse {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Created")]
    created_at: String,
}

/// List response from API.
#[derive(Debug, Deserialize)]
struct ListOwnersResponse {
    items: Vec<OwnerResponse>,
    #[allow(dead_code)]
    total: i64,
}

/// Create owner request.
#[derive(Debug, Serialize)]
struct CreateOwnerRequest {
    name: String,
}

/// A slot row in the summary.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
pub(super) struct SlotResponse {
    #[tabled(rename = "ID")]
    pub id: String,

    #[tabled(rename = "Start")]
    pub start_time: String,

    #[tabled(rename = "End")]
    pub end_time: String,

    #[tabled(rename = "Used")]
    pub used: i32,

    #[tabled(rename = "Capacity")]
    pub capacity: i32,

    #[tabled(rename = "Available")]
    pub available: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct TokenStats {
    pub total: i64,
    pub confirmed: i64,
    pub waiting: i64,
    pub cancelled: i64,
    pub emergencies: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct OwnerSummaryResponse {
    owner: OwnerResponse,
    pub slots: Vec<SlotResponse>,
    pub tokens: TokenStats,
}

/// List all owners.
async fn list_owners(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;

    let response: ListOwnersResponse = client.get("/v1/owners").await?;

    print_output(&response.items, ctx.format);
    Ok(())
}

/// Create a new owner.
async fn create_owner(ctx: CommandContext, args: CreateOwnerArgs) -> Result<()> {
    let client = ctx.client()?;

    let request = CreateOwnerRequest { name: args.name };
    let response: OwnerResponse = client.post("/v1/owners", &request).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Created owner '{}' ({})",
                response.name, response.id
            ));
        }
    }

    Ok(())
}

/// Get owner details.
async fn get_owner(ctx: CommandContext, args: GetOwnerArgs) -> Result<()> {
    let client = ctx.client()?;

    let response: OwnerResponse = client
        .get(&format!("/v1/owners/{}", args.owner_id))
        .await
        .map_err(|e| match e {
            CliError::Api { status: 404, .. } => {
                CliError::NotFound(format!("Owner '{}' not found", args.owner_id))
            }
            other => other,
        })?;

    print_single(&response, ctx.format);
    Ok(())
}

/// Show an owner's chain and token statistics.
async fn owner_summary(ctx: CommandContext, args: SummaryArgs) -> Result<()> {
    let owner_id = match args.owner_id.as_deref() {
        Some(id) => id,
        None => ctx.require_owner()?,
    };
    let client = ctx.client()?;

    let response: OwnerSummaryResponse =
        client.get(&format!("/v1/owners/{owner_id}/summary")).await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response, ctx.format),
        OutputFormat::Table => {
            println!("Owner: {} ({})", response.owner.name, response.owner.id);
            println!();
            print_output(&response.slots, ctx.format);
            println!();
            let t = &response.tokens;
            println!(
                "Tokens: {} total | {} confirmed | {} waiting | {} cancelled | {} emergencies",
                t.total, t.confirmed, t.waiting, t.cancelled, t.emergencies
            );
        }
    }

    Ok(())
}
