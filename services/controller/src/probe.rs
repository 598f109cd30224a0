//! Utilization probe: asks agents for live per-job CPU usage.
//!
//! Probes run outside the scheduler actor. An agent that fails or times out
//! is recorded as unreachable; its jobs simply have no reading, and a job
//! without a reading is never stolen from.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use hotplug_id::AgentName;
use serde::Serialize;
use tracing::{debug, warn};

use crate::agent_client::{AgentClient, AgentError, AgentJobStatus, AgentStatus};
use crate::ledger::JobKey;

/// An agent to query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub agent: AgentName,
    pub endpoint: String,
}

/// What a steal attempt needs probed, captured inside the actor.
#[derive(Debug, Clone, Default)]
pub struct ProbePlan {
    pub targets: Vec<ProbeTarget>,
    /// Generation of every steal-eligible allocation when the plan was made.
    pub generations: BTreeMap<JobKey, u64>,
}

impl ProbePlan {
    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }
}

/// Per-job CPU readings gathered in one probe round.
#[derive(Debug, Clone, Default)]
pub struct UtilizationSnapshot {
    readings: BTreeMap<AgentName, BTreeMap<String, f64>>,
    pub unreachable: Vec<AgentName>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl UtilizationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one agent's report.
    pub fn insert(&mut self, agent: AgentName, status: &AgentStatus) {
        let jobs = status
            .jobs
            .iter()
            .map(|j| (j.job.clone(), j.cpu_percent))
            .collect();
        self.readings.insert(agent, jobs);
    }

    /// CPU percentage reported for `key`, if its agent answered and listed it.
    pub fn cpu_percent(&self, key: &JobKey) -> Option<f64> {
        self.readings
            .get(&key.agent)
            .and_then(|jobs| jobs.get(key.job.as_str()))
            .copied()
    }

    pub fn reachable_count(&self) -> usize {
        self.readings.len()
    }
}

/// Live status of one agent for the dashboard view.
#[derive(Debug, Clone, Serialize)]
pub struct LiveAgentStatus {
    pub agent: AgentName,
    pub reachable: bool,
    pub jobs: Vec<AgentJobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Concurrent, time-bounded status queries against agents.
#[derive(Clone)]
pub struct UtilizationProbe {
    client: Arc<dyn AgentClient>,
    timeout: Duration,
}

impl UtilizationProbe {
    pub fn new(client: Arc<dyn AgentClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Queries every target concurrently.
    pub async fn query(
        &self,
        targets: &[ProbeTarget],
    ) -> Vec<(ProbeTarget, Result<AgentStatus, AgentError>)> {
        let calls = targets.iter().map(|target| {
            let client = Arc::clone(&self.client);
            let timeout = self.timeout;
            async move {
                let status = client.status(&target.endpoint);
                let result = match tokio::time::timeout(timeout, status).await {
                    Ok(result) => result,
                    Err(_) => Err(AgentError::Timeout {
                        endpoint: target.endpoint.clone(),
                    }),
                };
                (target.clone(), result)
            }
        });
        join_all(calls).await
    }

    /// Gathers one utilization snapshot.
    pub async fn gather(&self, targets: &[ProbeTarget]) -> UtilizationSnapshot {
        let mut snapshot = UtilizationSnapshot::new();
        for (target, result) in self.query(targets).await {
            match result {
                Ok(status) => {
                    debug!(
                        agent = %target.agent,
                        jobs = status.jobs.len(),
                        "Agent status received"
                    );
                    snapshot.insert(target.agent, &status);
                }
                Err(e) => {
                    warn!(
                        agent = %target.agent,
                        error = %e,
                        "AgentUnreachable during utilization probe"
                    );
                    snapshot.unreachable.push(target.agent);
                }
            }
        }
        snapshot.taken_at = Some(Utc::now());
        snapshot
    }

    /// Per-agent live job lists as reported by the agents.
    pub async fn live_status(&self, targets: &[ProbeTarget]) -> Vec<LiveAgentStatus> {
        self.query(targets)
            .await
            .into_iter()
            .map(|(target, result)| match result {
                Ok(status) => LiveAgentStatus {
                    agent: target.agent,
                    reachable: true,
                    jobs: status.jobs,
                    error: None,
                },
                Err(e) => LiveAgentStatus {
                    agent: target.agent,
                    reachable: false,
                    jobs: Vec::new(),
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }
}
