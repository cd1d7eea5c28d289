//! slotq - CLI for the slotq allocation service
//!
//! Operator interface for owners, slot chains and tokens: booking,
//! emergency insertion and cancellation, plus a scripted demo day.

use anyhow::Result;
use clap::Parser;

mod client;
mod commands;
mod config;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Run the command
    if let Err(e) = cli.run().await {
        // Print error in a user-friendly way
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
