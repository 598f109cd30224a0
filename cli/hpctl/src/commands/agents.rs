//! Agent commands.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use hotplug_id::AgentName;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct AgentsCommand {
    #[command(subcommand)]
    command: AgentsSubcommand,
}

#[derive(Debug, Subcommand)]
enum AgentsSubcommand {
    /// Register an agent's core range, or refresh an existing registration.
    Register(RegisterArgs),

    /// Refresh an agent's last-seen time without changing its range.
    Heartbeat(HeartbeatArgs),

    /// List registered agents.
    List,

    /// Remove an idle agent and unmap its cores.
    Deregister(DeregisterArgs),
}

#[derive(Debug, Args)]
struct RegisterArgs {
    /// Agent name.
    name: AgentName,

    /// Base URL the controller uses to reach the agent.
    #[arg(long)]
    endpoint: String,

    /// Number of cores the agent contributes.
    #[arg(long)]
    cores: usize,

    /// First global core index of the agent's range.
    #[arg(long)]
    offset: usize,
}

#[derive(Debug, Args)]
struct HeartbeatArgs {
    name: AgentName,
}

#[derive(Debug, Args)]
struct DeregisterArgs {
    name: AgentName,
}

impl AgentsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            AgentsSubcommand::Register(args) => register(ctx, args).await,
            AgentsSubcommand::Heartbeat(args) => heartbeat(ctx, args).await,
            AgentsSubcommand::List => list(ctx).await,
            AgentsSubcommand::Deregister(args) => deregister(ctx, args).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    name: &'a AgentName,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_cores: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
}

/// Register and heartbeat responses share one shape; range fields are
/// absent on a heartbeat.
#[derive(Debug, Serialize, Deserialize)]
struct RegisterResponse {
    agent: String,
    outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range_end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_total_cores: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_seen: Option<DateTime<Utc>>,
}

impl RegisterResponse {
    fn message(&self) -> String {
        let range = match (self.range_start, self.range_end) {
            (Some(start), Some(end)) => format!(" cores [{start}, {end})"),
            _ => String::new(),
        };
        match (self.previous_offset, self.previous_total_cores) {
            (Some(offset), Some(cores)) => format!(
                "Agent '{}' resized{range} (was offset={offset} cores={cores})",
                self.agent
            ),
            _ => format!("Agent '{}' {}{range}", self.agent, self.outcome),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct AgentResponse {
    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Endpoint")]
    endpoint: String,

    #[tabled(rename = "Offset")]
    offset: usize,

    #[tabled(rename = "Cores")]
    total_cores: usize,

    #[tabled(rename = "Free")]
    free_cores: usize,

    #[tabled(rename = "Last Seen", display = "display_time")]
    last_seen: DateTime<Utc>,
}

fn display_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ListAgentsResponse {
    items: Vec<AgentResponse>,
}

/// Record returned by a successful deregistration.
#[derive(Debug, Serialize, Deserialize)]
struct DeregisteredAgent {
    name: String,
    offset: usize,
    total_cores: usize,
}

async fn register(ctx: CommandContext, args: RegisterArgs) -> Result<()> {
    let client = ctx.client()?;
    let body = RegisterBody {
        name: &args.name,
        endpoint: Some(&args.endpoint),
        total_cores: Some(args.cores),
        offset: Some(args.offset),
    };
    let response: RegisterResponse = client.post("/v1/agents", &body).await?;

    match ctx.format {
        OutputFormat::Table => print_success(&response.message()),
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}

async fn heartbeat(ctx: CommandContext, args: HeartbeatArgs) -> Result<()> {
    let client = ctx.client()?;
    let body = RegisterBody {
        name: &args.name,
        endpoint: None,
        total_cores: None,
        offset: None,
    };
    let response: RegisterResponse = client
        .post("/v1/agents", &body)
        .await
        .map_err(|e| not_found(e, &args.name))?;

    match ctx.format {
        OutputFormat::Table => print_success(&response.message()),
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}

async fn list(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let response: ListAgentsResponse = client.get("/v1/agents").await?;

    match ctx.format {
        OutputFormat::Table => print_output(&response.items, ctx.format),
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}

async fn deregister(ctx: CommandContext, args: DeregisterArgs) -> Result<()> {
    let client = ctx.client()?;
    let response: DeregisteredAgent = client
        .delete(&format!("/v1/agents/{}", args.name))
        .await
        .map_err(|e| not_found(e, &args.name))?;

    match ctx.format {
        OutputFormat::Table => print_success(&format!(
            "Agent '{}' deregistered; cores [{}, {}) unmapped",
            response.name,
            response.offset,
            response.offset + response.total_cores
        )),
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}

fn not_found(err: CliError, name: &AgentName) -> CliError {
    match err {
        CliError::Api { status: 404, .. } => {
            CliError::NotFound(format!("Agent '{name}' is not registered"))
        }
        other => other,
    }
}
