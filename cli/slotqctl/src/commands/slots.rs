//! Slot chain commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::owners::SlotResponse;
use super::CommandContext;

/// Slot chain commands.
#[derive(Debug, Args)]
pub struct SlotsCommand {
    #[command(subcommand)]
    command: SlotsSubcommand,
}

#[derive(Debug, Subcommand)]
enum SlotsSubcommand {
    /// List the owner's slots in chain order.
    List,

    /// Append a slot to the owner's chain.
    Add(AddSlotArgs),

    /// List the confirmed tokens seated in a slot.
    Tokens(SlotTokensArgs),
}

#[derive(Debug, Args)]
struct AddSlotArgs {
    /// Window start, e.g. "09:00".
    #[arg(long)]
    start: String,

    /// Window end, e.g. "10:00".
    #[arg(long)]
    end: String,

    /// Confirmed seats in this window.
    #[arg(long)]
    capacity: i32,
}

#[derive(Debug, Args)]
struct SlotTokensArgs {
    /// Slot ID.
    slot_id: String,
}

impl SlotsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            SlotsSubcommand::List => list_slots(ctx).await,
            SlotsSubcommand::Add(args) => add_slot(ctx, args).await,
            SlotsSubcommand::Tokens(args) => slot_tokens(ctx, args).await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListSlotsResponse {
    items: Vec<SlotResponse>,
}

#[derive(Debug, Serialize)]
struct CreateSlotRequest {
    start_time: String,
    end_time: String,
    capacity: i32,
}

/// A confirmed occupant of a slot, in serving order.
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct OccupantRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Patient")]
    patient: String,

    #[tabled(rename = "Kind")]
    kind: String,

    #[tabled(rename = "Priority")]
    priority: f64,
}

#[derive(Debug, Deserialize)]
struct SlotTokensResponse {
    start_time: String,
    end_time: String,
    capacity: i32,
    used: i32,
    items: Vec<OccupantRow>,
}

async fn list_slots(ctx: CommandContext) -> Result<()> {
    let owner_id = ctx.require_owner()?;
    let client = ctx.client()?;

    let response: ListSlotsResponse =
        client.get(&format!("/v1/owners/{owner_id}/slots")).await?;

    print_output(&response.items, ctx.format);
    Ok(())
}

async fn add_slot(ctx: CommandContext, args: AddSlotArgs) -> Result<()> {
    let owner_id = ctx.require_owner()?;
    let client = ctx.client()?;

    let request = CreateSlotRequest {
        start_time: args.start,
        end_time: args.end,
        capacity: args.capacity,
    };
    let response: SlotResponse = client
        .post(&format!("/v1/owners/{owner_id}/slots"), &request)
        .await?;

    match ctx.format {
        OutputFormat::Json => print_single(&response, ctx.format),
        OutputFormat::Table => {
            print_success(&format!(
                "Added slot {} ({}-{}, capacity {})",
                response.id, response.start_time, response.end_time, response.capacity
            ));
        }
    }

    Ok(())
}

async fn slot_tokens(ctx: CommandContext, args: SlotTokensArgs) -> Result<()> {
    let client = ctx.client()?;

    let response: SlotTokensResponse = client
        .get(&format!("/v1/slots/{}/tokens", args.slot_id))
        .await
        .map_err(|e| match e {
            CliError::Api { status: 404, .. } => {
                CliError::NotFound(format!("Slot '{}' not found", args.slot_id))
            }
            other => other,
        })?;

    match ctx.format {
        OutputFormat::Json => print_single(
            &serde_json::json!({
                "start_time": response.start_time,
                "end_time": response.end_time,
                "capacity": response.capacity,
                "used": response.used,
                "items": response.items,
            }),
            ctx.format,
        ),
        OutputFormat::Table => {
            println!(
                "Slot {}-{}: {}/{} seats used",
                response.start_time, response.end_time, response.used, response.capacity
            );
            print_output(&response.items, ctx.format);
        }
    }

    Ok(())
}
