//! Event payload definitions for the allocation engine.
//!
//! Each action has a payload struct with the action-specific data. Core
//! indices are global indices into the unified core map.

use hotplug_id::{AgentName, JobName};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Actions
// =============================================================================

/// Kind of state transition an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Register,
    Allocate,
    Steal,
    Complete,
    Queue,
    Drop,
}

impl EventAction {
    /// Wire name of the action.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventAction::Register => "register",
            EventAction::Allocate => "allocate",
            EventAction::Steal => "steal",
            EventAction::Complete => "complete",
            EventAction::Queue => "queue",
            EventAction::Drop => "drop",
        }
    }
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventAction {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(EventAction::Register),
            "allocate" => Ok(EventAction::Allocate),
            "steal" => Ok(EventAction::Steal),
            "complete" => Ok(EventAction::Complete),
            "queue" => Ok(EventAction::Queue),
            "drop" => Ok(EventAction::Drop),
            other => Err(EventError::UnknownAction(other.to_string())),
        }
    }
}

/// How an allocation was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPath {
    /// Entirely from the requesting agent's free cores.
    Direct,
    /// From free cores, some of them in other agents' ranges.
    Pooled,
    /// At least one core was reclaimed from another job.
    Steal,
}

impl AllocationPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationPath::Direct => "direct",
            AllocationPath::Pooled => "pooled",
            AllocationPath::Steal => "steal",
        }
    }
}

impl std::fmt::Display for AllocationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub agent: AgentName,
    pub endpoint: String,
    pub total_cores: usize,
    pub offset: usize,
    /// True when an existing registration with the same geometry was refreshed.
    #[serde(default)]
    pub refreshed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatePayload {
    pub agent: AgentName,
    pub job: JobName,
    pub pid: u32,
    pub cores: Vec<usize>,
    pub path: AllocationPath,
}

/// Cores moved from a victim job to a beneficiary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealPayload {
    pub victim_agent: AgentName,
    pub victim_job: JobName,
    pub cores: Vec<usize>,
    /// Number of cores the victim still owns after the steal.
    pub victim_remaining: usize,
    pub beneficiary_agent: AgentName,
    pub beneficiary_job: JobName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePayload {
    pub agent: AgentName,
    pub job: JobName,
    /// Released cores; empty when a queued request was withdrawn.
    pub freed: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePayload {
    pub agent: AgentName,
    pub job: JobName,
    pub pid: u32,
    pub cores_requested: usize,
    /// 1-based position in the pending queue.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropPayload {
    pub agent: AgentName,
    pub job: JobName,
    pub reason: String,
}

// =============================================================================
// Detail
// =============================================================================

/// Structured detail of an allocation event, tagged by action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "detail", rename_all = "snake_case")]
pub enum EventDetail {
    Register(RegisterPayload),
    Allocate(AllocatePayload),
    Steal(StealPayload),
    Complete(CompletePayload),
    Queue(QueuePayload),
    Drop(DropPayload),
}

impl EventDetail {
    /// The action kind of this detail.
    pub const fn action(&self) -> EventAction {
        match self {
            EventDetail::Register(_) => EventAction::Register,
            EventDetail::Allocate(_) => EventAction::Allocate,
            EventDetail::Steal(_) => EventAction::Steal,
            EventDetail::Complete(_) => EventAction::Complete,
            EventDetail::Queue(_) => EventAction::Queue,
            EventDetail::Drop(_) => EventAction::Drop,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
