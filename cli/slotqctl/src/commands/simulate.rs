//! Scripted demo day.
//!
//! Sets up three owners with identical morning chains, walks each one
//! through bookings of every kind, two emergency insertions and a
//! cancellation, then prints per-owner and aggregate statistics. Useful for
//! demos and for eyeballing a fresh deployment end to end.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Deserialize;

use crate::client::ApiClient;
use crate::output::{print_info, print_success};

use super::owners::OwnerSummaryResponse;
use super::CommandContext;

/// Run a scripted demo day against the API.
#[derive(Debug, Args)]
pub struct SimulateCommand {
    /// Number of owners to simulate.
    #[arg(long, default_value = "3")]
    owners: usize,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TokenCreated {
    id: String,
    status: String,
}

const OWNER_NAMES: [&str; 3] = ["Dr. Sarah Johnson", "Dr. Michael Chen", "Dr. Priya Sharma"];

const SLOTS: [(&str, &str); 3] = [("09:00", "10:00"), ("10:00", "11:00"), ("11:00", "12:00")];

const BOOKINGS: [(&str, &str); 9] = [
    ("A", "ONLINE"),
    ("B", "WALKIN"),
    ("C", "PRIORITY"),
    ("D", "FOLLOWUP"),
    ("E", "ONLINE"),
    ("F", "WALKIN"),
    ("G", "FOLLOWUP"),
    ("H", "ONLINE"),
    ("I", "PRIORITY"),
];

impl SimulateCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.client()?;

        println!("{}", "slotq demo day".cyan().bold());
        print_info(&format!(
            "Simulating {} owners, {} slots each (capacity 3)",
            self.owners,
            SLOTS.len()
        ));

        let mut owner_ids = Vec::new();
        for n in 0..self.owners {
            let name = OWNER_NAMES
                .get(n)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("Dr. Demo {}", n + 1));
            let owner: Created = client
                .post("/v1/owners", &serde_json::json!({ "name": name }))
                .await?;
            for (start, end) in SLOTS {
                let _: Created = client
                    .post(
                        &format!("/v1/owners/{}/slots", owner.id),
                        &serde_json::json!({
                            "start_time": start,
                            "end_time": end,
                            "capacity": 3,
                        }),
                    )
                    .await?;
            }
            print_success(&format!("Created {name} ({})", owner.id));
            owner_ids.push(owner.id);
        }

        let mut summaries = Vec::new();
        for (n, owner_id) in owner_ids.iter().enumerate() {
            println!();
            println!(
                "{}",
                format!("--- Owner {} ({owner_id}) ---", n + 1).magenta()
            );
            let summary = simulate_owner(&client, owner_id, n + 1).await?;
            summaries.push(summary);
        }

        println!();
        println!("{}", "=== Aggregate ===".yellow().bold());
        let mut total = 0;
        let mut confirmed = 0;
        let mut waiting = 0;
        let mut cancelled = 0;
        let mut emergencies = 0;
        for summary in &summaries {
            total += summary.tokens.total;
            confirmed += summary.tokens.confirmed;
            waiting += summary.tokens.waiting;
            cancelled += summary.tokens.cancelled;
            emergencies += summary.tokens.emergencies;
        }
        println!(
            "Tokens: {total} total | {confirmed} confirmed | {waiting} waiting | \
             {cancelled} cancelled | {emergencies} emergencies"
        );

        Ok(())
    }
}

async fn simulate_owner(
    client: &ApiClient,
    owner_id: &str,
    owner_num: usize,
) -> Result<OwnerSummaryResponse> {
    // Nine bookings against nine seats: every kind, chain fills completely.
    let mut first_online = None;
    for (suffix, kind) in BOOKINGS {
        let token: TokenCreated = client
            .post(
                "/v1/tokens/book",
                &serde_json::json!({
                    "patient": format!("Patient-{owner_num}{suffix}"),
                    "owner_id": owner_id,
                    "kind": kind,
                }),
            )
            .await?;
        println!("  booked {kind:>8} -> {} ({})", token.status, token.id);
        if first_online.is_none() && kind == "ONLINE" {
            first_online = Some(token.id);
        }
    }

    // Two emergencies ripple through the full chain.
    for suffix in ["X", "Y"] {
        let token: TokenCreated = client
            .post(
                "/v1/tokens/emergency",
                &serde_json::json!({
                    "patient": format!("EMERGENCY-{owner_num}{suffix}"),
                    "owner_id": owner_id,
                }),
            )
            .await?;
        println!(
            "  {} -> {} ({})",
            "emergency".red().bold(),
            token.status,
            token.id
        );
    }

    // Cancel the first online booking; the waitlist fills the seat.
    if let Some(token_id) = first_online {
        let token: TokenCreated = client
            .post_empty(&format!("/v1/tokens/{token_id}/cancel"))
            .await?;
        println!("  cancelled {} -> waitlist promoted", token.id);
    }

    let summary: OwnerSummaryResponse =
        client.get(&format!("/v1/owners/{owner_id}/summary")).await?;
    let t = &summary.tokens;
    println!(
        "  totals: {} total | {} confirmed | {} waiting | {} cancelled | {} emergencies",
        t.total, t.confirmed, t.waiting, t.cancelled, t.emergencies
    );
    for slot in &summary.slots {
        println!(
            "  slot {}-{}: {}/{} used",
            slot.start_time, slot.end_time, slot.used, slot.capacity
        );
    }

    Ok(summary)
}
