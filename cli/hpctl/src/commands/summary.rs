//! Summary and live utilization views.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::output::{format_cores, print_heading, print_output, print_single, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct SummaryCommand {
    /// Number of activity lines to show.
    #[arg(long, default_value = "20")]
    activity: usize,
}

#[derive(Debug, Args)]
pub struct LiveCommand {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Totals {
    total_cores: usize,
    free: usize,
    owned: usize,
    pending: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryAgent {
    name: String,
    total_cores: usize,
    offset: usize,
    free_cores: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobKey {
    agent: String,
    job: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CoreEntry {
    index: usize,
    state: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    owner: Option<JobKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct AllocationRow {
    #[tabled(rename = "Agent")]
    agent: String,

    #[tabled(rename = "Job")]
    job: String,

    #[tabled(rename = "PID")]
    pid: u32,

    #[tabled(rename = "Requested")]
    cores_requested: usize,

    #[tabled(rename = "Cores", display = "display_cores")]
    cores: Vec<usize>,

    #[tabled(rename = "Since", display = "display_time")]
    allocated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct PendingRow {
    #[tabled(rename = "#")]
    sequence: u64,

    #[tabled(rename = "Agent")]
    agent: String,

    #[tabled(rename = "Job")]
    job: String,

    #[tabled(rename = "PID")]
    pid: u32,

    #[tabled(rename = "Requested")]
    cores_requested: usize,

    #[tabled(rename = "Queued At", display = "display_time")]
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActivityLine {
    at: DateTime<Utc>,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SummaryResponse {
    totals: Totals,
    agents: Vec<SummaryAgent>,
    core_map: Vec<CoreEntry>,
    allocations: Vec<AllocationRow>,
    pending: Vec<PendingRow>,
    activity: Vec<ActivityLine>,
    #[serde(default)]
    stats: serde_json::Value,
}

/// One agent's slice of the core map.
#[derive(Debug, Serialize, Tabled)]
struct AgentMapRow {
    #[tabled(rename = "Agent")]
    agent: String,

    #[tabled(rename = "Range")]
    range: String,

    #[tabled(rename = "Free")]
    free: String,

    #[tabled(rename = "Map")]
    map: String,
}

fn display_cores(cores: &[usize]) -> String {
    format_cores(cores)
}

fn display_time(at: &DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}

/// `#` for an owned core, `.` for a free one, in index order.
fn core_bar(core_map: &[CoreEntry], agent: &str) -> String {
    let mut cores: Vec<&CoreEntry> = core_map
        .iter()
        .filter(|c| c.agent.as_deref() == Some(agent))
        .collect();
    cores.sort_by_key(|c| c.index);
    cores
        .iter()
        .map(|c| if c.state == "owned" { '#' } else { '.' })
        .collect()
}

fn agent_rows(summary: &SummaryResponse) -> Vec<AgentMapRow> {
    summary
        .agents
        .iter()
        .map(|agent| AgentMapRow {
            agent: agent.name.clone(),
            range: format!("{}-{}", agent.offset, agent.offset + agent.total_cores),
            free: format!("{}/{}", agent.free_cores, agent.total_cores),
            map: core_bar(&summary.core_map, &agent.name),
        })
        .collect()
}

impl SummaryCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.client()?;
        let mut summary: SummaryResponse = client.get("/v1/summary").await?;
        summary.activity.truncate(self.activity);

        if ctx.format == OutputFormat::Json {
            print_single(&summary);
            return Ok(());
        }

        let totals = &summary.totals;
        println!(
            "{} {} cores, {} free, {} owned, {} pending",
            "Pool:".bold(),
            totals.total_cores,
            totals.free.to_string().green(),
            totals.owned.to_string().yellow(),
            totals.pending
        );

        print_heading("Agents");
        print_output(&agent_rows(&summary), ctx.format);

        print_heading("Allocations");
        print_output(&summary.allocations, ctx.format);

        print_heading("Pending");
        print_output(&summary.pending, ctx.format);

        print_heading("Activity");
        if summary.activity.is_empty() {
            println!("{}", "No activity yet.".dimmed());
        }
        for line in &summary.activity {
            println!("{} {}", display_time(&line.at).dimmed(), line.message);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobUtilization {
    job: String,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    cores: Vec<usize>,
    cpu_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LiveAgent {
    agent: String,
    reachable: bool,
    #[serde(default)]
    jobs: Vec<JobUtilization>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LiveResponse {
    items: Vec<LiveAgent>,
}

#[derive(Debug, Serialize, Tabled)]
struct LiveRow {
    #[tabled(rename = "Agent")]
    agent: String,

    #[tabled(rename = "Job")]
    job: String,

    #[tabled(rename = "PID")]
    pid: String,

    #[tabled(rename = "Cores")]
    cores: String,

    #[tabled(rename = "CPU %")]
    cpu: String,
}

fn live_rows(items: &[LiveAgent]) -> Vec<LiveRow> {
    let mut rows = Vec::new();
    for agent in items {
        if !agent.reachable {
            rows.push(LiveRow {
                agent: agent.agent.clone(),
                job: "-".to_string(),
                pid: "-".to_string(),
                cores: "-".to_string(),
                cpu: "unreachable".to_string(),
            });
            continue;
        }
        for job in &agent.jobs {
            rows.push(LiveRow {
                agent: agent.agent.clone(),
                job: job.job.clone(),
                pid: job.pid.map_or_else(|| "-".to_string(), |p| p.to_string()),
                cores: format_cores(&job.cores),
                cpu: format!("{:.1}", job.cpu_percent),
            });
        }
    }
    rows
}

impl LiveCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.client()?;
        let response: LiveResponse = client.get("/v1/live").await?;

        match ctx.format {
            OutputFormat::Table => print_output(&live_rows(&response.items), ctx.format),
            OutputFormat::Json => print_single(&response),
        }
        Ok(())
    }
}
