//! Engine error types.
//!
//! Every error is local to one command: when a command fails, no engine
//! state has been changed.

use hotplug_id::{AgentName, JobName};
use thiserror::Error;

use crate::ledger::JobState;

/// Errors returned by the scheduler for a single command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The agent's core range overlaps another agent's range.
    #[error("agent {agent} range [{start}, {end}) overlaps agent {other} at [{other_start}, {other_end})")]
    OffsetConflict {
        agent: AgentName,
        start: usize,
        end: usize,
        other: AgentName,
        other_start: usize,
        other_end: usize,
    },

    /// Allocated cores tie the agent to its geometry.
    #[error("agent {agent} is busy: {owned} cores still allocated")]
    AgentBusy { agent: AgentName, owned: usize },

    /// The agent is not registered.
    #[error("agent {0} is not registered")]
    UnknownAgent(AgentName),

    /// The job is neither allocated nor queued.
    #[error("job {job} on agent {agent} is not allocated or queued")]
    UnknownJob { agent: AgentName, job: JobName },

    /// The job key is already in use.
    #[error("job {job} on agent {agent} is already {state}")]
    DuplicateJob {
        agent: AgentName,
        job: JobName,
        state: JobState,
    },

    /// The command carried an invalid value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Engine bookkeeping disagrees with itself.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The scheduler mailbox is closed.
    #[error("scheduler is not running")]
    EngineUnavailable,
}

impl EngineError {
    /// Stable machine-readable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            EngineError::OffsetConflict { .. } => "offset_conflict",
            EngineError::AgentBusy { .. } => "agent_busy",
            EngineError::UnknownAgent(_) => "unknown_agent",
            EngineError::UnknownJob { .. } => "unknown_job",
            EngineError::DuplicateJob { .. } => "duplicate_job",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::InvariantViolation(_) => "invariant_violation",
            EngineError::EngineUnavailable => "engine_unavailable",
        }
    }

    /// Whether retrying the same command later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, EngineError::EngineUnavailable)
    }
}
