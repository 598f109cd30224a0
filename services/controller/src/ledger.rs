//! Allocation ledger: which global core indices each job owns.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use hotplug_id::{AgentName, JobName};
use serde::{Deserialize, Serialize};

/// Identity of a job: the agent it runs on plus its name on that agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub agent: AgentName,
    pub job: JobName,
}

impl JobKey {
    pub fn new(agent: AgentName, job: JobName) -> Self {
        Self { agent, job }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.agent, self.job)
    }
}

/// Lifecycle state of a job known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// A steal attempt is probing agents for this request.
    Admitting,
    Queued,
    Allocated,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Admitting => write!(f, "admitting"),
            JobState::Queued => write!(f, "queued"),
            JobState::Allocated => write!(f, "allocated"),
        }
    }
}

/// A live allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub pid: u32,
    pub cores_requested: usize,
    /// Owned global indices, ascending.
    pub cores: BTreeSet<usize>,
    /// Stamp taken from the ledger-wide counter on every ownership change.
    pub generation: u64,
    /// Arrival order among allocations.
    pub sequence: u64,
    pub allocated_at: DateTime<Utc>,
}

impl Allocation {
    pub fn owned(&self) -> usize {
        self.cores.len()
    }
}

/// Per-job ownership records.
#[derive(Debug, Default)]
pub struct Ledger {
    allocations: BTreeMap<JobKey, Allocation>,
    next_sequence: u64,
    next_generation: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &JobKey) -> Option<&Allocation> {
        self.allocations.get(key)
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.allocations.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JobKey, &Allocation)> {
        self.allocations.iter()
    }

    /// Creates an empty allocation for `key` and returns it.
    pub(crate) fn open(
        &mut self,
        key: JobKey,
        pid: u32,
        cores_requested: usize,
    ) -> &mut Allocation {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let generation = self.bump_counter();

        self.allocations.entry(key).or_insert_with(|| Allocation {
            pid,
            cores_requested,
            cores: BTreeSet::new(),
            generation,
            sequence,
            allocated_at: Utc::now(),
        })
    }

    pub(crate) fn get_mut(&mut self, key: &JobKey) -> Option<&mut Allocation> {
        self.allocations.get_mut(key)
    }

    pub(crate) fn remove(&mut self, key: &JobKey) -> Option<Allocation> {
        self.allocations.remove(key)
    }

    /// Stamps `key` with a fresh generation.
    pub(crate) fn touch(&mut self, key: &JobKey) {
        let generation = self.bump_counter();
        if let Some(alloc) = self.allocations.get_mut(key) {
            alloc.generation = generation;
        }
    }

    fn bump_counter(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(agent: &str, job: &str) -> JobKey {
        JobKey::new(AgentName::parse(agent).unwrap(), JobName::parse(job).unwrap())
    }

    #[test]
    fn test_job_key_display() {
        assert_eq!(key("agentA", "job1").to_string(), "agentA/job1");
    }

    #[test]
    fn test_open_assigns_increasing_sequence() {
        let mut ledger = Ledger::new();
        let first = ledger.open(key("a", "j1"), 10, 2).sequence;
        let second = ledger.open(key("a", "j2"), 11, 1).sequence;
        assert!(first < second);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_touch_changes_generation() {
        let mut ledger = Ledger::new();
        let k = key("a", "j1");
        let before = ledger.open(k.clone(), 10, 2).generation;
        ledger.touch(&k);
        let after = ledger.get(&k).unwrap().generation;
        assert_ne!(before, after);
    }

    #[test]
    fn test_generations_never_repeat_across_jobs() {
        let mut ledger = Ledger::new();
        let g1 = ledger.open(key("a", "j1"), 1, 1).generation;
        ledger.remove(&key("a", "j1"));
        let g2 = ledger.open(key("a", "j1"), 1, 1).generation;
        assert_ne!(g1, g2);
    }
}
