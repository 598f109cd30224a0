//! Job commands: request and complete cores.

use anyhow::Result;
use clap::{Args, Subcommand};
use hotplug_id::{AgentName, JobName};
use serde::{Deserialize, Serialize};

use crate::error::CliError;
use crate::output::{format_cores, print_info, print_single, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct JobsCommand {
    #[command(subcommand)]
    command: JobsSubcommand,
}

#[derive(Debug, Subcommand)]
enum JobsSubcommand {
    /// Request cores for a job; the request is queued if none can be found.
    Request(RequestArgs),

    /// Release a job's cores, or withdraw its queued request.
    Complete(CompleteArgs),
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// Agent the job runs on.
    #[arg(long)]
    agent: AgentName,

    /// Job name, unique per agent.
    #[arg(long)]
    job: JobName,

    /// Process id of the job on the agent.
    #[arg(long)]
    pid: u32,

    /// Number of cores wanted.
    #[arg(long)]
    cores: usize,
}

#[derive(Debug, Args)]
struct CompleteArgs {
    #[arg(long)]
    agent: AgentName,

    #[arg(long)]
    job: JobName,
}

impl JobsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            JobsSubcommand::Request(args) => request(ctx, args).await,
            JobsSubcommand::Complete(args) => complete(ctx, args).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    agent: &'a AgentName,
    job: &'a JobName,
    pid: u32,
    cores_requested: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum RequestResponse {
    Allocated {
        cores: Vec<usize>,
        #[serde(default)]
        stolen: Vec<usize>,
        path: String,
    },
    Queued {
        position: usize,
    },
}

#[derive(Debug, Serialize)]
struct CompleteBody<'a> {
    agent: &'a AgentName,
    job: &'a JobName,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompleteResponse {
    freed: Vec<usize>,
    #[serde(default)]
    withdrawn: bool,
}

async fn request(ctx: CommandContext, args: RequestArgs) -> Result<()> {
    let client = ctx.client()?;
    let body = RequestBody {
        agent: &args.agent,
        job: &args.job,
        pid: args.pid,
        cores_requested: args.cores,
    };
    let response: RequestResponse = client.post("/v1/jobs", &body).await?;

    match ctx.format {
        OutputFormat::Table => match &response {
            RequestResponse::Allocated {
                cores,
                stolen,
                path,
            } => {
                print_success(&format!(
                    "{}/{} allocated cores {} ({path})",
                    args.agent,
                    args.job,
                    format_cores(cores)
                ));
                if !stolen.is_empty() {
                    print_info(&format!("Taken from other jobs: {}", format_cores(stolen)));
                }
            }
            RequestResponse::Queued { position } => print_info(&format!(
                "{}/{} queued at position {position}; it will be retried by the reconcile loop",
                args.agent, args.job
            )),
        },
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}

async fn complete(ctx: CommandContext, args: CompleteArgs) -> Result<()> {
    let client = ctx.client()?;
    let body = CompleteBody {
        agent: &args.agent,
        job: &args.job,
    };
    let response: CompleteResponse = client
        .post("/v1/jobs/complete", &body)
        .await
        .map_err(|e| match e {
            CliError::Api { status: 404, .. } => CliError::NotFound(format!(
                "Job '{}' has no allocation or queued request on '{}'",
                args.job, args.agent
            )),
            other => other,
        })?;

    match ctx.format {
        OutputFormat::Table if response.withdrawn => print_success(&format!(
            "Queued request for {}/{} withdrawn",
            args.agent, args.job
        )),
        OutputFormat::Table => print_success(&format!(
            "{}/{} completed; freed cores {}",
            args.agent,
            args.job,
            format_cores(&response.freed)
        )),
        OutputFormat::Json => print_single(&response),
    }
    Ok(())
}
