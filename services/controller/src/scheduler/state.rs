//! Allocation engine state and admission logic.
//!
//! `SchedulerState` is plain data with synchronous methods. It never talks to
//! agents: remote work is described as a `ProbePlan` going out and
//! `AgentCall`s plus events coming back through `drain_effects`. The actor
//! owns one instance and is the only caller.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use chrono::Utc;
use hotplug_events::{
    AllocatePayload, AllocationEvent, AllocationPath, CompletePayload, DropPayload, EventDetail,
    QueuePayload, RegisterPayload, StealPayload,
};
use hotplug_id::AgentName;
use tracing::{debug, info};

use crate::activity::ActivityFeed;
use crate::admission::{plan_steal, AdmissionPolicy, StealCandidate, StealTake};
use crate::agent_client::{AllocateRequest, ReleaseRequest};
use crate::core_map::CoreSlot;
use crate::error::EngineError;
use crate::ledger::{JobKey, JobState};
use crate::pending::PendingQueue;
use crate::pool::CorePool;
use crate::probe::{ProbePlan, ProbeTarget, UtilizationSnapshot};
use crate::registry::{AgentRecord, AgentRegistration, AgentRegistry, RegisterOutcome};

use super::notifier::AgentCall;
use super::view::{
    AgentView, AllocationView, CompleteOutcome, CoreState, CoreView, JobRequest, PoolTotals,
    ReconcileReport, RegisterAck, RequestOutcome, SchedulerStats, SchedulerSummary,
};

/// Activity lines included in a summary.
pub const SUMMARY_ACTIVITY_LINES: usize = 200;

/// Side effects produced by committed transitions.
#[derive(Debug, Default)]
pub struct Effects {
    pub events: Vec<AllocationEvent>,
    pub calls: Vec<AgentCall>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.calls.is_empty()
    }
}

/// First step of a request.
#[derive(Debug)]
pub enum Admission {
    /// Settled without remote calls.
    Done(RequestOutcome),
    /// Stealing may help; probe these agents and call `finish_admission`.
    NeedsProbe(ProbePlan),
}

#[derive(Debug)]
pub struct SchedulerState {
    policy: AdmissionPolicy,
    registry: AgentRegistry,
    pool: CorePool,
    pending: PendingQueue,
    admitting: BTreeSet<JobKey>,
    activity: ActivityFeed,
    stats: SchedulerStats,
    effects: Effects,
}

impl SchedulerState {
    pub fn new(policy: AdmissionPolicy, activity_capacity: usize) -> Self {
        Self {
            policy,
            registry: AgentRegistry::new(),
            pool: CorePool::new(),
            pending: PendingQueue::new(),
            admitting: BTreeSet::new(),
            activity: ActivityFeed::new(activity_capacity),
            stats: SchedulerStats::default(),
            effects: Effects::default(),
        }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &CorePool {
        &self.pool
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Takes the events and agent calls produced since the last drain.
    pub fn drain_effects(&mut self) -> Effects {
        std::mem::take(&mut self.effects)
    }

    pub fn job_state(&self, key: &JobKey) -> Option<JobState> {
        if self.pool.ledger().contains(key) {
            Some(JobState::Allocated)
        } else if self.pending.contains(key) {
            Some(JobState::Queued)
        } else if self.admitting.contains(key) {
            Some(JobState::Admitting)
        } else {
            None
        }
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub fn register(&mut self, reg: AgentRegistration) -> Result<RegisterAck, EngineError> {
        reg.validate()?;
        let range = reg.range();
        self.registry.check_overlap(&reg.name, range.clone())?;

        if let Some(existing) = self.registry.get(&reg.name) {
            let old = existing.range();
            if old != range {
                let owned = self.pool.map().owned_count(old);
                if owned > 0 {
                    return Err(EngineError::AgentBusy {
                        agent: reg.name.clone(),
                        owned,
                    });
                }
            }
        }

        let outcome = self.registry.upsert(&reg, Utc::now());
        match &outcome {
            RegisterOutcome::Registered => self.pool.map_range(range.clone()),
            RegisterOutcome::Refreshed => {}
            RegisterOutcome::Resized {
                previous_offset,
                previous_total_cores,
            } => {
                self.pool
                    .unmap_range(*previous_offset..previous_offset + previous_total_cores);
                self.pool.map_range(range.clone());
            }
        }

        self.record(
            reg.name.to_string(),
            EventDetail::Register(RegisterPayload {
                agent: reg.name.clone(),
                endpoint: reg.normalized_endpoint(),
                total_cores: reg.total_cores,
                offset: reg.offset,
                refreshed: outcome == RegisterOutcome::Refreshed,
            }),
        );

        Ok(RegisterAck {
            agent: reg.name,
            outcome,
            range_start: range.start,
            range_end: range.end,
        })
    }

    /// Refreshes `last_seen` without touching geometry.
    pub fn heartbeat(&mut self, agent: &AgentName) -> Result<AgentRecord, EngineError> {
        self.registry
            .touch(agent, Utc::now())
            .cloned()
            .ok_or_else(|| EngineError::UnknownAgent(agent.clone()))
    }

    /// Removes an agent whose range hosts no allocation and whose jobs hold
    /// no cores anywhere. Its queued requests are dropped
    /// on the next reconciliation tick.
    pub fn deregister(&mut self, agent: &AgentName) -> Result<AgentRecord, EngineError> {
        let record = self
            .registry
            .get(agent)
            .ok_or_else(|| EngineError::UnknownAgent(agent.clone()))?;
        // Cores the agent's jobs hold anywhere, plus foreign jobs in its range.
        let held: usize = self
            .pool
            .ledger()
            .iter()
            .filter(|(key, _)| key.agent == *agent)
            .map(|(_, alloc)| alloc.owned())
            .sum();
        let hosted = self.pool.map().owned_count(record.range());
        if held > 0 || hosted > 0 {
            return Err(EngineError::AgentBusy {
                agent: agent.clone(),
                owned: held.max(hosted),
            });
        }

        let range = record.range();
        self.pool.unmap_range(range);
        let record = self
            .registry
            .remove(agent)
            .ok_or_else(|| EngineError::UnknownAgent(agent.clone()))?;
        self.activity
            .push(Utc::now(), format!("deregistered {}", record.name));
        Ok(record)
    }

    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.registry
            .iter()
            .map(|a| ProbeTarget {
                agent: a.name.clone(),
                endpoint: a.endpoint.clone(),
            })
            .collect()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    fn validate_request(&self, req: &JobRequest) -> Result<(), EngineError> {
        if !self.registry.contains(&req.agent) {
            return Err(EngineError::UnknownAgent(req.agent.clone()));
        }
        if req.cores_requested == 0 {
            return Err(EngineError::InvalidRequest(
                "cores_requested must be at least 1".to_string(),
            ));
        }
        if let Some(state) = self.job_state(&req.key()) {
            return Err(EngineError::DuplicateJob {
                agent: req.agent.clone(),
                job: req.job.clone(),
                state,
            });
        }
        Ok(())
    }

    /// Admits a request: direct fit, else a probe plan for stealing, else
    /// the pending queue.
    pub fn request(&mut self, req: &JobRequest) -> Result<Admission, EngineError> {
        self.validate_request(req)?;
        let key = req.key();

        if let Some(outcome) = self.try_direct(&key, req.pid, req.cores_requested) {
            return Ok(Admission::Done(outcome));
        }

        let plan = self.probe_plan();
        if plan.is_empty() {
            let position = self.enqueue(key, req.pid, req.cores_requested);
            return Ok(Admission::Done(RequestOutcome::Queued { position }));
        }

        self.admitting.insert(key);
        Ok(Admission::NeedsProbe(plan))
    }

    /// Settles a request after its probe returned.
    pub fn finish_admission(
        &mut self,
        req: &JobRequest,
        plan: &ProbePlan,
        snapshot: &UtilizationSnapshot,
    ) -> Result<RequestOutcome, EngineError> {
        let key = req.key();
        self.admitting.remove(&key);

        if !self.registry.contains(&req.agent) {
            return Err(EngineError::UnknownAgent(req.agent.clone()));
        }

        if let Some(outcome) = self.try_direct(&key, req.pid, req.cores_requested) {
            return Ok(outcome);
        }
        if let Some(outcome) = self.try_steal(&key, req.pid, req.cores_requested, plan, snapshot) {
            return Ok(outcome);
        }

        let position = self.enqueue(key, req.pid, req.cores_requested);
        Ok(RequestOutcome::Queued { position })
    }

    /// Abandons an in-flight admission whose probe never reported back.
    pub fn abort_admission(&mut self, req: &JobRequest) {
        self.admitting.remove(&req.key());
    }

    pub fn complete(&mut self, key: &JobKey) -> Result<CompleteOutcome, EngineError> {
        if let Some(alloc) = self.pool.release(key) {
            let freed: Vec<usize> = alloc.cores.into_iter().collect();
            if let Some(agent) = self.registry.get(&key.agent) {
                self.effects.calls.push(AgentCall::Release {
                    agent: agent.name.clone(),
                    endpoint: agent.endpoint.clone(),
                    request: ReleaseRequest {
                        job: key.job.clone(),
                        released: freed.clone(),
                        keep_cores: Vec::new(),
                    },
                });
            }
            self.stats.completed += 1;
            self.record_complete(key, freed.clone());
            return Ok(CompleteOutcome {
                freed,
                withdrawn: false,
            });
        }

        if self.pending.remove(key).is_some() {
            self.stats.withdrawn += 1;
            self.record_complete(key, Vec::new());
            return Ok(CompleteOutcome {
                freed: Vec::new(),
                withdrawn: true,
            });
        }

        Err(EngineError::UnknownJob {
            agent: key.agent.clone(),
            job: key.job.clone(),
        })
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// First half of a tick: drop orphaned entries, then direct fit in FIFO
    /// order.
    pub fn reconcile_direct(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for entry in self.pending.snapshot() {
            if self.drop_if_orphaned(&entry.key) {
                report.dropped += 1;
                continue;
            }
            if self
                .try_direct(&entry.key, entry.pid, entry.cores_requested)
                .is_some()
            {
                self.pending.remove(&entry.key);
                report.direct += 1;
            }
        }

        report.still_pending = self.pending.len();
        report
    }

    /// Probe plan for the steal pass, or `None` when it cannot help.
    pub fn reconcile_plan(&self) -> Option<ProbePlan> {
        if self.pending.is_empty() {
            return None;
        }
        let plan = self.probe_plan();
        (!plan.is_empty()).then_some(plan)
    }

    /// Second half of a tick: one snapshot shared by every remaining entry,
    /// walked in FIFO order without head-of-line blocking.
    pub fn reconcile_steal(
        &mut self,
        plan: &ProbePlan,
        snapshot: &UtilizationSnapshot,
    ) -> ReconcileReport {
        let stale_before = self.stats.stale_candidates;
        let mut report = ReconcileReport {
            probed: true,
            ..ReconcileReport::default()
        };

        for entry in self.pending.snapshot() {
            if self.drop_if_orphaned(&entry.key) {
                report.dropped += 1;
                continue;
            }
            if self
                .try_direct(&entry.key, entry.pid, entry.cores_requested)
                .is_some()
            {
                self.pending.remove(&entry.key);
                report.direct += 1;
            } else if self
                .try_steal(&entry.key, entry.pid, entry.cores_requested, plan, snapshot)
                .is_some()
            {
                self.pending.remove(&entry.key);
                report.stolen += 1;
            }
        }

        report.stale = (self.stats.stale_candidates - stale_before) as usize;
        report.still_pending = self.pending.len();
        report
    }

    fn drop_if_orphaned(&mut self, key: &JobKey) -> bool {
        if self.registry.contains(&key.agent) {
            return false;
        }
        self.pending.remove(key);
        self.stats.dropped += 1;
        self.record(
            key.to_string(),
            EventDetail::Drop(DropPayload {
                agent: key.agent.clone(),
                job: key.job.clone(),
                reason: "agent not registered".to_string(),
            }),
        );
        true
    }

    // =========================================================================
    // Admission steps
    // =========================================================================

    fn total_free(&self) -> usize {
        let map = self.pool.map();
        map.free_count(0..map.len())
    }

    /// Up to `n` free indices: the agent's own range first, then other
    /// agents' ranges in ascending offset order.
    fn pooled_free(&self, own: &Range<usize>, n: usize) -> Vec<usize> {
        let mut picked = self.pool.free_indices(own.clone(), n);
        for agent in self.registry.by_offset() {
            if picked.len() >= n {
                break;
            }
            let range = agent.range();
            if range == *own {
                continue;
            }
            picked.extend(self.pool.free_indices(range, n - picked.len()));
        }
        picked
    }

    fn try_direct(&mut self, key: &JobKey, pid: u32, need: usize) -> Option<RequestOutcome> {
        let range = self.registry.get(&key.agent)?.range();
        let wanted = need.checked_add(self.policy.reserve_cores)?;

        let (cores, path) = if self.pool.free_count(range.clone()) >= wanted {
            (self.pool.free_indices(range, need), AllocationPath::Direct)
        } else if self.total_free() >= wanted {
            (self.pooled_free(&range, need), AllocationPath::Pooled)
        } else {
            return None;
        };

        Some(self.commit(key, pid, need, cores, Vec::new(), path))
    }

    fn try_steal(
        &mut self,
        key: &JobKey,
        pid: u32,
        need: usize,
        plan: &ProbePlan,
        snapshot: &UtilizationSnapshot,
    ) -> Option<RequestOutcome> {
        let range = self.registry.get(&key.agent)?.range();
        let usable_free = self
            .total_free()
            .saturating_sub(self.policy.reserve_cores)
            .min(need);
        let needed = need - usable_free;

        let candidates = self.steal_candidates(key, plan, snapshot);
        let takes = plan_steal(needed, &candidates)?;
        let free = self.pooled_free(&range, usable_free);

        Some(self.commit(key, pid, need, free, takes, AllocationPath::Steal))
    }

    /// Allocations with a live reading, unchanged since the probe, that can
    /// donate at least one core, in policy order.
    fn steal_candidates(
        &mut self,
        requester: &JobKey,
        plan: &ProbePlan,
        snapshot: &UtilizationSnapshot,
    ) -> Vec<StealCandidate> {
        let mut candidates = Vec::new();

        for (victim, planned) in &plan.generations {
            if victim == requester {
                continue;
            }
            let Some(alloc) = self.pool.ledger().get(victim) else {
                continue;
            };
            if alloc.generation != *planned {
                self.stats.stale_candidates += 1;
                info!(
                    victim = %victim,
                    beneficiary = %requester,
                    planned_generation = planned,
                    current_generation = alloc.generation,
                    "StaleOwnershipOnCommit: candidate changed since probe; skipping"
                );
                continue;
            }
            let Some(cpu_percent) = snapshot.cpu_percent(victim) else {
                continue;
            };
            let spare = self.policy.spare(cpu_percent, alloc.owned());
            if spare == 0 {
                continue;
            }
            candidates.push(StealCandidate {
                key: victim.clone(),
                spare,
                sequence: alloc.sequence,
                cores: alloc.cores.iter().copied().collect(),
            });
        }

        self.policy.order(&mut candidates);
        candidates
    }

    fn probe_plan(&self) -> ProbePlan {
        let mut generations = BTreeMap::new();
        let mut agents = BTreeSet::new();

        for (key, alloc) in self.pool.ledger().iter() {
            if !self.policy.can_donate(alloc.owned()) || !self.registry.contains(&key.agent) {
                continue;
            }
            generations.insert(key.clone(), alloc.generation);
            agents.insert(key.agent.clone());
        }

        let targets = agents
            .into_iter()
            .filter_map(|name| {
                self.registry.get(&name).map(|a| ProbeTarget {
                    agent: name.clone(),
                    endpoint: a.endpoint.clone(),
                })
            })
            .collect();

        ProbePlan {
            targets,
            generations,
        }
    }

    fn enqueue(&mut self, key: JobKey, pid: u32, need: usize) -> usize {
        let position = self.pending.push(key.clone(), pid, need);
        self.stats.queued += 1;
        debug!(job = %key, position, "Request queued");
        self.record(
            key.to_string(),
            EventDetail::Queue(QueuePayload {
                agent: key.agent.clone(),
                job: key.job.clone(),
                pid,
                cores_requested: need,
                position,
            }),
        );
        position
    }

    /// Applies a grant: victims lose their taken cores, `key` gets `free`
    /// plus every taken core. Events and agent calls follow the commit.
    fn commit(
        &mut self,
        key: &JobKey,
        pid: u32,
        need: usize,
        free: Vec<usize>,
        takes: Vec<StealTake>,
        path: AllocationPath,
    ) -> RequestOutcome {
        let mut stolen: Vec<usize> = takes.iter().flat_map(|t| t.cores.iter().copied()).collect();
        let mut indices = free;
        indices.extend(stolen.iter().copied());

        let losers = self.pool.assign(key, pid, need, &indices);

        for take in &takes {
            let remaining: Vec<usize> = self
                .pool
                .ledger()
                .get(&take.victim)
                .map(|a| a.cores.iter().copied().collect())
                .unwrap_or_default();
            debug_assert_eq!(losers.get(&take.victim), Some(&take.cores));

            if let Some(agent) = self.registry.get(&take.victim.agent) {
                self.effects.calls.push(AgentCall::Release {
                    agent: agent.name.clone(),
                    endpoint: agent.endpoint.clone(),
                    request: ReleaseRequest {
                        job: take.victim.job.clone(),
                        released: take.cores.clone(),
                        keep_cores: remaining.clone(),
                    },
                });
            }
            self.stats.steals += 1;
            self.record(
                take.victim.to_string(),
                EventDetail::Steal(StealPayload {
                    victim_agent: take.victim.agent.clone(),
                    victim_job: take.victim.job.clone(),
                    cores: take.cores.clone(),
                    victim_remaining: remaining.len(),
                    beneficiary_agent: key.agent.clone(),
                    beneficiary_job: key.job.clone(),
                }),
            );
        }

        let cores: Vec<usize> = self
            .pool
            .ledger()
            .get(key)
            .map(|a| a.cores.iter().copied().collect())
            .unwrap_or_default();

        if let Some(agent) = self.registry.get(&key.agent) {
            self.effects.calls.push(AgentCall::Allocate {
                agent: agent.name.clone(),
                endpoint: agent.endpoint.clone(),
                request: AllocateRequest {
                    job: key.job.clone(),
                    pid,
                    cores: cores.clone(),
                },
            });
        }
        self.stats.allocations += 1;
        self.record(
            key.to_string(),
            EventDetail::Allocate(AllocatePayload {
                agent: key.agent.clone(),
                job: key.job.clone(),
                pid,
                cores: cores.clone(),
                path,
            }),
        );

        stolen.sort_unstable();
        RequestOutcome::Allocated {
            cores,
            stolen,
            path,
        }
    }

    fn record_complete(&mut self, key: &JobKey, freed: Vec<usize>) {
        self.record(
            key.to_string(),
            EventDetail::Complete(CompletePayload {
                agent: key.agent.clone(),
                job: key.job.clone(),
                freed,
            }),
        );
    }

    fn record(&mut self, subject: String, detail: EventDetail) {
        let event = AllocationEvent::new(subject, detail);
        self.activity.record(&event);
        self.effects.events.push(event);
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn summary(&self) -> SchedulerSummary {
        let map = self.pool.map();
        let agents_by_offset = self.registry.by_offset();

        let range_owner = |index: usize| -> Option<AgentName> {
            agents_by_offset
                .iter()
                .find(|a| a.range().contains(&index))
                .map(|a| a.name.clone())
        };

        let core_map = map
            .iter()
            .map(|(index, slot)| {
                let (state, owner) = match slot {
                    CoreSlot::Unmapped => (CoreState::Unmapped, None),
                    CoreSlot::Free => (CoreState::Free, None),
                    CoreSlot::Owned(key) => (CoreState::Owned, Some(key.clone())),
                };
                CoreView {
                    index,
                    state,
                    agent: range_owner(index),
                    owner,
                }
            })
            .collect();

        let agents = self
            .registry
            .iter()
            .map(|a| AgentView {
                name: a.name.clone(),
                endpoint: a.endpoint.clone(),
                total_cores: a.total_cores,
                offset: a.offset,
                free_cores: self.pool.free_count(a.range()),
                registered_at: a.registered_at,
                last_seen: a.last_seen,
            })
            .collect();

        let allocations = self
            .pool
            .ledger()
            .iter()
            .map(|(key, alloc)| AllocationView {
                agent: key.agent.clone(),
                job: key.job.clone(),
                pid: alloc.pid,
                cores_requested: alloc.cores_requested,
                cores: alloc.cores.iter().copied().collect(),
                generation: alloc.generation,
                allocated_at: alloc.allocated_at,
            })
            .collect();

        let free = self.total_free();
        let owned = map.owned_count(0..map.len());

        SchedulerSummary {
            totals: PoolTotals {
                total_cores: self.registry.total_cores(),
                free,
                owned,
                pending: self.pending.len(),
            },
            agents,
            core_map,
            allocations,
            pending: self.pending.snapshot(),
            activity: self.activity.recent(SUMMARY_ACTIVITY_LINES),
            stats: self.stats,
        }
    }

    /// Verifies partition, conservation and floor-independent bookkeeping.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.pool.check_consistency()?;
        let map = self.pool.map();

        for (index, slot) in map.iter() {
            let covering = self
                .registry
                .iter()
                .filter(|a| a.range().contains(&index))
                .count();
            match (slot, covering) {
                (CoreSlot::Unmapped, 0) => {}
                (CoreSlot::Unmapped, _) => {
                    return Err(format!("core {index} is unmapped inside an agent range"))
                }
                (_, 1) => {}
                (_, n) => return Err(format!("core {index} is covered by {n} agents")),
            }
        }

        for agent in self.registry.iter() {
            let range = agent.range();
            let free = map.free_count(range.clone());
            let owned = map.owned_count(range);
            if free + owned != agent.total_cores {
                return Err(format!(
                    "agent {}: free {free} + owned {owned} != total {}",
                    agent.name, agent.total_cores
                ));
            }
        }

        for (key, _) in self.pool.ledger().iter() {
            if !self.registry.contains(&key.agent) {
                return Err(format!("{key} is allocated to an unregistered agent"));
            }
        }

        for entry in self.pending.iter() {
            if self.pool.ledger().contains(&entry.key) {
                return Err(format!("{} is both queued and allocated", entry.key));
            }
        }

        Ok(())
    }
}
