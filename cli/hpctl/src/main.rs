//! hpctl - CLI for the hotplug core controller
//!
//! Registers agents, requests and completes cores for jobs, and renders the
//! controller's summary and live utilization views.

use anyhow::Result;
use clap::Parser;

mod client;
mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
