//! Scheduler actor.
//!
//! Owns the `SchedulerState` and applies one command at a time. Utilization
//! probes run in spawned tasks and come back as `AdmissionProbed` or
//! `ReconcileProbed`; the actor keeps serving other commands meanwhile, so
//! every steal is validated against the allocation generations recorded
//! when the probe started.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hotplug_id::AgentName;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

use crate::actors::{Actor, WeakActorHandle};
use crate::error::EngineError;
use crate::event_log::EventSink;
use crate::ledger::JobKey;
use crate::probe::{ProbePlan, ProbeTarget, UtilizationProbe, UtilizationSnapshot};
use crate::registry::{AgentRecord, AgentRegistration, RegisterOutcome};

use super::notifier::AgentNotifier;
use super::state::{Admission, SchedulerState};
use super::view::{
    CompleteOutcome, JobRequest, ReconcileReport, RegisterAck, RequestOutcome, SchedulerSummary,
};

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages handled by the scheduler actor.
#[derive(Debug)]
pub enum SchedulerCommand {
    Register {
        registration: AgentRegistration,
        reply: Reply<RegisterAck>,
    },
    Heartbeat {
        agent: AgentName,
        reply: Reply<AgentRecord>,
    },
    Deregister {
        agent: AgentName,
        reply: Reply<AgentRecord>,
    },
    Request {
        request: JobRequest,
        reply: Reply<RequestOutcome>,
    },
    Complete {
        key: JobKey,
        reply: Reply<CompleteOutcome>,
    },
    Summary {
        reply: oneshot::Sender<SchedulerSummary>,
    },
    ProbeTargets {
        reply: oneshot::Sender<Vec<ProbeTarget>>,
    },
    /// Runs one reconciliation tick. Ticks requested while one is probing
    /// share its report.
    Reconcile {
        reply: Option<oneshot::Sender<ReconcileReport>>,
    },
    CheckInvariants {
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Probe results for an admission waiting on `ticket`.
    AdmissionProbed {
        ticket: u64,
        snapshot: UtilizationSnapshot,
    },
    /// Probe results for the steal pass of the running tick.
    ReconcileProbed {
        plan: ProbePlan,
        snapshot: UtilizationSnapshot,
    },
}

#[derive(Debug)]
struct InFlight {
    request: JobRequest,
    plan: ProbePlan,
    reply: Reply<RequestOutcome>,
}

#[derive(Debug, Default)]
struct ReconcileStatus {
    in_flight: bool,
    partial: ReconcileReport,
    waiters: Vec<oneshot::Sender<ReconcileReport>>,
}

pub struct SchedulerActor {
    state: SchedulerState,
    sink: Arc<dyn EventSink>,
    notifier: AgentNotifier,
    probe: UtilizationProbe,
    self_handle: WeakActorHandle<SchedulerCommand>,
    capacity: Arc<Notify>,
    admissions: HashMap<u64, InFlight>,
    next_ticket: u64,
    reconcile: ReconcileStatus,
}

impl SchedulerActor {
    pub fn new(
        state: SchedulerState,
        sink: Arc<dyn EventSink>,
        notifier: AgentNotifier,
        probe: UtilizationProbe,
        self_handle: WeakActorHandle<SchedulerCommand>,
        capacity: Arc<Notify>,
    ) -> Self {
        Self {
            state,
            sink,
            notifier,
            probe,
            self_handle,
            capacity,
            admissions: HashMap::new(),
            next_ticket: 0,
            reconcile: ReconcileStatus::default(),
        }
    }

    /// Emits events and dispatches agent calls for everything committed
    /// since the last flush.
    fn flush(&mut self) {
        let effects = self.state.drain_effects();
        for event in &effects.events {
            if let Err(e) = self.sink.emit(event) {
                warn!(
                    event_id = %event.event_id,
                    action = %event.action(),
                    error = %e,
                    "Failed to write allocation event"
                );
            }
        }
        self.notifier.dispatch(effects.calls);

        if cfg!(debug_assertions) {
            if let Err(violation) = self.state.check_invariants() {
                error!(violation = %violation, "Scheduler invariant violated");
            }
        }
    }

    fn spawn_probe<F>(&self, targets: Vec<ProbeTarget>, make: F)
    where
        F: FnOnce(UtilizationSnapshot) -> SchedulerCommand + Send + 'static,
    {
        let probe = self.probe.clone();
        let handle = self.self_handle.clone();
        tokio::spawn(async move {
            let snapshot = probe.gather(&targets).await;
            match handle.upgrade() {
                Some(handle) => {
                    if handle.send(make(snapshot)).await.is_err() {
                        debug!("Scheduler stopped before probe results arrived");
                    }
                }
                None => debug!("Scheduler gone; discarding probe results"),
            }
        });
    }

    fn handle_request(&mut self, request: JobRequest, reply: Reply<RequestOutcome>) {
        match self.state.request(&request) {
            Ok(Admission::Done(outcome)) => {
                self.flush();
                let _ = reply.send(Ok(outcome));
            }
            Ok(Admission::NeedsProbe(plan)) => {
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                debug!(
                    job = %request.key(),
                    ticket,
                    agents = plan.targets.len(),
                    candidates = plan.generations.len(),
                    "Probing utilization before steal"
                );
                let targets = plan.targets.clone();
                self.admissions.insert(
                    ticket,
                    InFlight {
                        request,
                        plan,
                        reply,
                    },
                );
                self.spawn_probe(targets, move |snapshot| SchedulerCommand::AdmissionProbed {
                    ticket,
                    snapshot,
                });
            }
            Err(e) => {
                debug!(job = %request.key(), error = %e, "Request rejected");
                let _ = reply.send(Err(e));
            }
        }
    }

    fn handle_admission_probed(&mut self, ticket: u64, snapshot: UtilizationSnapshot) {
        let Some(InFlight {
            request,
            plan,
            reply,
        }) = self.admissions.remove(&ticket)
        else {
            warn!(ticket, "Probe results for unknown admission");
            return;
        };

        let result = self.state.finish_admission(&request, &plan, &snapshot);
        self.flush();
        if let Ok(RequestOutcome::Allocated { cores, stolen, path }) = &result {
            info!(
                job = %request.key(),
                cores = ?cores,
                stolen = stolen.len(),
                path = %path,
                "Request admitted after probe"
            );
        }
        let _ = reply.send(result);
    }

    fn handle_reconcile(&mut self, reply: Option<oneshot::Sender<ReconcileReport>>) {
        if self.reconcile.in_flight {
            if let Some(reply) = reply {
                self.reconcile.waiters.push(reply);
            }
            return;
        }

        let report = self.state.reconcile_direct();
        self.flush();

        match self.state.reconcile_plan() {
            Some(plan) => {
                self.reconcile.in_flight = true;
                self.reconcile.partial = report;
                self.reconcile.waiters.extend(reply);
                let targets = plan.targets.clone();
                self.spawn_probe(targets, move |snapshot| SchedulerCommand::ReconcileProbed {
                    plan,
                    snapshot,
                });
            }
            None => {
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
        }
    }

    fn handle_reconcile_probed(&mut self, plan: ProbePlan, snapshot: UtilizationSnapshot) {
        let steal = self.state.reconcile_steal(&plan, &snapshot);
        self.flush();

        let report = std::mem::take(&mut self.reconcile.partial).merge(steal);
        self.reconcile.in_flight = false;
        for waiter in self.reconcile.waiters.drain(..) {
            let _ = waiter.send(report.clone());
        }
    }
}

#[async_trait]
impl Actor for SchedulerActor {
    type Message = SchedulerCommand;

    fn name(&self) -> &str {
        "scheduler"
    }

    async fn handle(&mut self, msg: SchedulerCommand) -> bool {
        match msg {
            SchedulerCommand::Register {
                registration,
                reply,
            } => {
                let result = self.state.register(registration);
                self.flush();
                if let Ok(ack) = &result {
                    info!(
                        agent = %ack.agent,
                        range_start = ack.range_start,
                        range_end = ack.range_end,
                        outcome = ?ack.outcome,
                        "Agent registered"
                    );
                    if ack.outcome != RegisterOutcome::Refreshed {
                        self.capacity.notify_one();
                    }
                }
                let _ = reply.send(result);
            }
            SchedulerCommand::Heartbeat { agent, reply } => {
                let _ = reply.send(self.state.heartbeat(&agent));
            }
            SchedulerCommand::Deregister { agent, reply } => {
                let result = self.state.deregister(&agent);
                self.flush();
                if result.is_ok() {
                    info!(agent = %agent, "Agent deregistered");
                    self.capacity.notify_one();
                }
                let _ = reply.send(result);
            }
            SchedulerCommand::Request { request, reply } => {
                self.handle_request(request, reply);
            }
            SchedulerCommand::Complete { key, reply } => {
                let result = self.state.complete(&key);
                self.flush();
                if let Ok(outcome) = &result {
                    info!(
                        job = %key,
                        freed = outcome.freed.len(),
                        withdrawn = outcome.withdrawn,
                        "Job completed"
                    );
                    if !outcome.freed.is_empty() {
                        self.capacity.notify_one();
                    }
                }
                let _ = reply.send(result);
            }
            SchedulerCommand::Summary { reply } => {
                let _ = reply.send(self.state.summary());
            }
            SchedulerCommand::ProbeTargets { reply } => {
                let _ = reply.send(self.state.probe_targets());
            }
            SchedulerCommand::Reconcile { reply } => {
                self.handle_reconcile(reply);
            }
            SchedulerCommand::CheckInvariants { reply } => {
                let _ = reply.send(self.state.check_invariants());
            }
            SchedulerCommand::AdmissionProbed { ticket, snapshot } => {
                self.handle_admission_probed(ticket, snapshot);
            }
            SchedulerCommand::ReconcileProbed { plan, snapshot } => {
                self.handle_reconcile_probed(plan, snapshot);
            }
        }
        true
    }

    async fn on_stop(&mut self) {
        for (_, in_flight) in self.admissions.drain() {
            self.state.abort_admission(&in_flight.request);
            let _ = in_flight.reply.send(Err(EngineError::EngineUnavailable));
        }
        self.reconcile.waiters.clear();
        info!(
            pending = self.state.pending().len(),
            allocations = self.state.pool().ledger().len(),
            "Scheduler stopped"
        );
    }
}
