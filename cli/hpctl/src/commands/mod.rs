//! CLI commands.

mod agents;
mod jobs;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::output::OutputFormat;

/// hpctl - inspect and drive the hotplug core controller.
#[derive(Debug, Parser)]
#[command(name = "hpctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Base URL of the controller API.
    #[arg(
        long,
        global = true,
        env = "HOTPLUG_API_URL",
        default_value = "http://127.0.0.1:5000"
    )]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register, refresh, list, and deregister agents.
    Agents(agents::AgentsCommand),

    /// Request and complete cores for jobs.
    Jobs(jobs::JobsCommand),

    /// Show the pool, allocations, pending queue, and recent activity.
    Summary(summary::SummaryCommand),

    /// Query every agent for live per-job utilization.
    Live(summary::LiveCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            format: OutputFormat::parse(&self.format),
            api_url: self.api_url,
        };

        match self.command {
            Commands::Agents(cmd) => cmd.run(ctx).await,
            Commands::Jobs(cmd) => cmd.run(ctx).await,
            Commands::Summary(cmd) => cmd.run(ctx).await,
            Commands::Live(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("hpctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub format: OutputFormat,
    pub api_url: String,
}

impl CommandContext {
    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.api_url)
    }
}
