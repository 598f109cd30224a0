//! FIFO queue of requests waiting for capacity.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ledger::JobKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    #[serde(flatten)]
    pub key: JobKey,
    pub pid: u32,
    pub cores_requested: usize,
    pub enqueued_at: DateTime<Utc>,
    /// Monotonic enqueue order.
    pub sequence: u64,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<PendingRequest>,
    next_sequence: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request and returns its 1-based position.
    pub fn push(&mut self, key: JobKey, pid: u32, cores_requested: usize) -> usize {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(PendingRequest {
            key,
            pid,
            cores_requested,
            enqueued_at: Utc::now(),
            sequence,
        });
        self.entries.len()
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.entries.iter().any(|e| &e.key == key)
    }

    /// 1-based position of `key`, if queued.
    pub fn position(&self, key: &JobKey) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key).map(|i| i + 1)
    }

    pub fn remove(&mut self, key: &JobKey) -> Option<PendingRequest> {
        let index = self.entries.iter().position(|e| &e.key == key)?;
        self.entries.remove(index)
    }

    /// Entries in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.entries.iter()
    }

    /// Owned copy of the queue in FIFO order.
    pub fn snapshot(&self) -> Vec<PendingRequest> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotplug_id::{AgentName, JobName};

    fn key(job: &str) -> JobKey {
        JobKey::new(AgentName::parse("a").unwrap(), JobName::parse(job).unwrap())
    }

    #[test]
    fn test_fifo_positions() {
        let mut queue = PendingQueue::new();
        assert_eq!(queue.push(key("j1"), 1, 2), 1);
        assert_eq!(queue.push(key("j2"), 2, 2), 2);
        assert_eq!(queue.push(key("j3"), 3, 2), 3);

        queue.remove(&key("j2"));
        assert_eq!(queue.position(&key("j3")), Some(2));
        assert!(!queue.contains(&key("j2")));

        let order: Vec<_> = queue.iter().map(|e| e.key.job.to_string()).collect();
        assert_eq!(order, vec!["j1", "j3"]);
    }

    #[test]
    fn test_sequence_keeps_growing_after_removal() {
        let mut queue = PendingQueue::new();
        queue.push(key("j1"), 1, 1);
        let first = queue.remove(&key("j1")).unwrap().sequence;
        queue.push(key("j1"), 1, 1);
        assert!(queue.iter().next().unwrap().sequence > first);
    }
}
