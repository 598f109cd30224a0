//! Commands and results exchanged with the scheduler.

use chrono::{DateTime, Utc};
use hotplug_events::AllocationPath;
use hotplug_id::{AgentName, JobName};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityLine;
use crate::ledger::JobKey;
use crate::pending::PendingRequest;
use crate::registry::RegisterOutcome;

/// A request for `cores_requested` cores for one job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobRequest {
    pub agent: AgentName,
    pub job: JobName,
    pub pid: u32,
    pub cores_requested: usize,
}

impl JobRequest {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.agent.clone(), self.job.clone())
    }
}

/// Result of `request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    Allocated {
        /// Every core granted, ascending.
        cores: Vec<usize>,
        /// The subset taken from other jobs.
        stolen: Vec<usize>,
        path: AllocationPath,
    },
    Queued {
        /// 1-based position in the pending queue.
        position: usize,
    },
}

impl RequestOutcome {
    pub fn is_allocated(&self) -> bool {
        matches!(self, RequestOutcome::Allocated { .. })
    }
}

/// Result of `complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOutcome {
    pub freed: Vec<usize>,
    /// True when a queued request was withdrawn instead of an allocation freed.
    pub withdrawn: bool,
}

/// Result of `register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterAck {
    pub agent: AgentName,
    #[serde(flatten)]
    pub outcome: RegisterOutcome,
    pub range_start: usize,
    pub range_end: usize,
}

/// What one reconciliation tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Entries dropped because their agent is gone.
    pub dropped: usize,
    /// Entries granted from free cores.
    pub direct: usize,
    /// Entries granted with stolen cores.
    pub stolen: usize,
    /// Candidates skipped because their ownership changed after the probe.
    pub stale: usize,
    /// Whether a utilization probe ran.
    pub probed: bool,
    pub still_pending: usize,
}

impl ReconcileReport {
    pub fn granted(&self) -> usize {
        self.direct + self.stolen
    }

    pub fn changed(&self) -> bool {
        self.dropped > 0 || self.granted() > 0
    }

    /// Adds the steal pass of the same tick.
    pub fn merge(mut self, later: ReconcileReport) -> Self {
        self.dropped += later.dropped;
        self.direct += later.direct;
        self.stolen += later.stolen;
        self.stale += later.stale;
        self.probed |= later.probed;
        self.still_pending = later.still_pending;
        self
    }
}

/// Running counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub allocations: u64,
    pub steals: u64,
    pub stale_candidates: u64,
    pub queued: u64,
    pub dropped: u64,
    pub completed: u64,
    pub withdrawn: u64,
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSummary {
    pub totals: PoolTotals,
    pub agents: Vec<AgentView>,
    pub core_map: Vec<CoreView>,
    pub allocations: Vec<AllocationView>,
    pub pending: Vec<PendingRequest>,
    /// Newest first.
    pub activity: Vec<ActivityLine>,
    pub stats: SchedulerStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolTotals {
    pub total_cores: usize,
    pub free: usize,
    pub owned: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub name: AgentName,
    pub endpoint: String,
    pub total_cores: usize,
    pub offset: usize,
    pub free_cores: usize,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreState {
    Unmapped,
    Free,
    Owned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreView {
    pub index: usize,
    pub state: CoreState,
    /// Agent whose partition covers this index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<JobKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationView {
    pub agent: AgentName,
    pub job: JobName,
    pub pid: u32,
    pub cores_requested: usize,
    pub cores: Vec<usize>,
    pub generation: u64,
    pub allocated_at: DateTime<Utc>,
}
