//! Agent registry: identity, endpoint and core partition of each agent.

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::{DateTime, Utc};
use hotplug_id::AgentName;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One past the highest global core index an agent may cover.
pub const MAX_GLOBAL_CORES: usize = 65_536;

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRecord {
    pub name: AgentName,
    pub endpoint: String,
    pub total_cores: usize,
    /// First global index of the agent's partition.
    pub offset: usize,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl AgentRecord {
    /// Global indices covered by this agent.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.total_cores
    }
}

/// A registration command, validated before it reaches the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentRegistration {
    pub name: AgentName,
    pub endpoint: String,
    pub total_cores: usize,
    pub offset: usize,
}

impl AgentRegistration {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.total_cores == 0 {
            return Err(EngineError::InvalidRequest(
                "total_cores must be at least 1".to_string(),
            ));
        }
        match self.offset.checked_add(self.total_cores) {
            Some(end) if end <= MAX_GLOBAL_CORES => {}
            _ => {
                return Err(EngineError::InvalidRequest(format!(
                    "offset + total_cores must not exceed {MAX_GLOBAL_CORES}"
                )))
            }
        }

        let url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            EngineError::InvalidRequest(format!("endpoint is not a valid URL: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(EngineError::InvalidRequest(
                "endpoint must be an http:// or https:// URL with a host".to_string(),
            ));
        }

        Ok(())
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.total_cores
    }

    /// Endpoint without a trailing slash.
    pub fn normalized_endpoint(&self) -> String {
        self.endpoint.trim_end_matches('/').to_string()
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegisterOutcome {
    /// First registration of this agent.
    Registered,
    /// Same geometry as before; endpoint and `last_seen` refreshed.
    Refreshed,
    /// Geometry changed; the previous range was unmapped.
    Resized { previous_offset: usize, previous_total_cores: usize },
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentName, AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &AgentName) -> Option<&AgentRecord> {
        self.agents.get(name)
    }

    pub fn contains(&self, name: &AgentName) -> bool {
        self.agents.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    /// Agents ordered by ascending offset.
    pub fn by_offset(&self) -> Vec<&AgentRecord> {
        let mut agents: Vec<_> = self.agents.values().collect();
        agents.sort_by_key(|a| (a.offset, a.name.clone()));
        agents
    }

    pub fn total_cores(&self) -> usize {
        self.agents.values().map(|a| a.total_cores).sum()
    }

    /// Returns an error if `range` overlaps any agent other than `name`.
    pub fn check_overlap(&self, name: &AgentName, range: Range<usize>) -> Result<(), EngineError> {
        let conflict = self
            .agents
            .values()
            .filter(|a| &a.name != name)
            .find(|a| {
                let other = a.range();
                range.start < other.end && other.start < range.end
            });

        match conflict {
            Some(other) => Err(EngineError::OffsetConflict {
                agent: name.clone(),
                start: range.start,
                end: range.end,
                other: other.name.clone(),
                other_start: other.offset,
                other_end: other.offset + other.total_cores,
            }),
            None => Ok(()),
        }
    }

    /// Inserts or replaces the record for `reg.name`.
    ///
    /// Overlap and busy checks are the caller's job; this only records.
    pub(crate) fn upsert(
        &mut self,
        reg: &AgentRegistration,
        now: DateTime<Utc>,
    ) -> RegisterOutcome {
        let endpoint = reg.normalized_endpoint();
        match self.agents.get_mut(&reg.name) {
            Some(record)
                if record.offset == reg.offset && record.total_cores == reg.total_cores =>
            {
                record.endpoint = endpoint;
                record.last_seen = now;
                RegisterOutcome::Refreshed
            }
            Some(record) => {
                let outcome = RegisterOutcome::Resized {
                    previous_offset: record.offset,
                    previous_total_cores: record.total_cores,
                };
                record.endpoint = endpoint;
                record.offset = reg.offset;
                record.total_cores = reg.total_cores;
                record.last_seen = now;
                outcome
            }
            None => {
                self.agents.insert(
                    reg.name.clone(),
                    AgentRecord {
                        name: reg.name.clone(),
                        endpoint,
                        total_cores: reg.total_cores,
                        offset: reg.offset,
                        registered_at: now,
                        last_seen: now,
                    },
                );
                RegisterOutcome::Registered
            }
        }
    }

    /// Refreshes `last_seen` for a heartbeat.
    pub(crate) fn touch(&mut self, name: &AgentName, now: DateTime<Utc>) -> Option<&AgentRecord> {
        let record = self.agents.get_mut(name)?;
        record.last_seen = now;
        Some(record)
    }

    pub(crate) fn remove(&mut self, name: &AgentName) -> Option<AgentRecord> {
        self.agents.remove(name)
    }
}
