//! Bounded, newest-first activity feed shown by the summary view.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use hotplug_events::{AllocationEvent, AllocationPath, EventDetail};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityLine {
    pub at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug)]
pub struct ActivityFeed {
    capacity: usize,
    lines: VecDeque<ActivityLine>,
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: VecDeque::with_capacity(capacity.clamp(1, 1024)),
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        self.lines.push_front(ActivityLine {
            at,
            message: message.into(),
        });
        self.lines.truncate(self.capacity);
    }

    pub fn record(&mut self, event: &AllocationEvent) {
        self.push(event.occurred_at, describe(event));
    }

    /// Up to `limit` lines, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityLine> {
        self.lines.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// One human-readable line for an event.
pub fn describe(event: &AllocationEvent) -> String {
    match &event.detail {
        EventDetail::Register(p) => {
            let verb = if p.refreshed { "refreshed" } else { "registered" };
            format!("{verb} {} offset={} cores={}", p.agent, p.offset, p.total_cores)
        }
        EventDetail::Allocate(p) => {
            let suffix = match p.path {
                AllocationPath::Direct => "",
                AllocationPath::Pooled => " (pooled)",
                AllocationPath::Steal => " (after steal)",
            };
            format!("allocated {}@{} -> {:?}{suffix}", p.job, p.agent, p.cores)
        }
        EventDetail::Steal(p) => format!(
            "stole {:?} from {}@{} for {}@{}",
            p.cores, p.victim_job, p.victim_agent, p.beneficiary_job, p.beneficiary_agent
        ),
        EventDetail::Complete(p) if p.freed.is_empty() => {
            format!("withdrew queued request {}@{}", p.job, p.agent)
        }
        EventDetail::Complete(p) => {
            format!("completed {}@{}, freed {:?}", p.job, p.agent, p.freed)
        }
        EventDetail::Queue(p) => format!(
            "queued request {}@{} need={} position={}",
            p.job, p.agent, p.cores_requested, p.position
        ),
        EventDetail::Drop(p) => format!("drop request {}@{} ({})", p.job, p.agent, p.reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotplug_events::{AllocatePayload, CompletePayload};
    use hotplug_id::{AgentName, JobName};

    #[test]
    fn test_feed_is_bounded_and_newest_first() {
        let mut feed = ActivityFeed::new(3);
        for i in 0..5 {
            feed.push(Utc::now(), format!("line {i}"));
        }
        assert_eq!(feed.len(), 3);
        let messages: Vec<_> = feed.recent(10).into_iter().map(|l| l.message).collect();
        assert_eq!(messages, vec!["line 4", "line 3", "line 2"]);
        assert_eq!(feed.recent(1).len(), 1);
    }

    #[test]
    fn test_describe_allocation_and_withdrawal() {
        let agent = AgentName::parse("agentA").unwrap();
        let job = JobName::parse("J2").unwrap();

        let alloc = AllocationEvent::new(
            "agentA/J2",
            EventDetail::Allocate(AllocatePayload {
                agent: agent.clone(),
                job: job.clone(),
                pid: 9,
                cores: vec![4, 5],
                path: AllocationPath::Pooled,
            }),
        );
        assert_eq!(describe(&alloc), "allocated J2@agentA -> [4, 5] (pooled)");

        let withdrawn = AllocationEvent::new(
            "agentA/J2",
            EventDetail::Complete(CompletePayload {
                agent,
                job,
                freed: Vec::new(),
            }),
        );
        assert_eq!(describe(&withdrawn), "withdrew queued request J2@agentA");
    }
}
