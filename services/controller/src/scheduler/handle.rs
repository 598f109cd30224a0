//! Cloneable front door to the scheduler actor.

use std::sync::Arc;

use hotplug_id::AgentName;
use tokio::sync::{oneshot, Notify};
use tracing::warn;

use crate::actors::{ActorError, ActorHandle};
use crate::error::EngineError;
use crate::ledger::JobKey;
use crate::probe::{LiveAgentStatus, UtilizationProbe};
use crate::registry::{AgentRecord, AgentRegistration};

use super::actor::SchedulerCommand;
use super::view::{
    CompleteOutcome, JobRequest, ReconcileReport, RegisterAck, RequestOutcome, SchedulerSummary,
};

#[derive(Clone)]
pub struct SchedulerHandle {
    actor: ActorHandle<SchedulerCommand>,
    probe: UtilizationProbe,
    capacity: Arc<Notify>,
}

fn unavailable(e: ActorError) -> EngineError {
    warn!(error = %e, "Scheduler did not answer");
    EngineError::EngineUnavailable
}

impl SchedulerHandle {
    pub(crate) fn new(
        actor: ActorHandle<SchedulerCommand>,
        probe: UtilizationProbe,
        capacity: Arc<Notify>,
    ) -> Self {
        Self {
            actor,
            probe,
            capacity,
        }
    }

    async fn call<T, F>(&self, make: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(oneshot::Sender<Result<T, EngineError>>) -> SchedulerCommand,
    {
        self.actor.ask(make).await.map_err(unavailable)?
    }

    pub async fn register(
        &self,
        registration: AgentRegistration,
    ) -> Result<RegisterAck, EngineError> {
        self.call(|reply| SchedulerCommand::Register {
            registration,
            reply,
        })
        .await
    }

    pub async fn heartbeat(&self, agent: AgentName) -> Result<AgentRecord, EngineError> {
        self.call(|reply| SchedulerCommand::Heartbeat { agent, reply })
            .await
    }

    pub async fn deregister(&self, agent: AgentName) -> Result<AgentRecord, EngineError> {
        self.call(|reply| SchedulerCommand::Deregister { agent, reply })
            .await
    }

    /// Resolves once the request is allocated or queued. May wait for one
    /// utilization probe.
    pub async fn request(&self, request: JobRequest) -> Result<RequestOutcome, EngineError> {
        self.call(|reply| SchedulerCommand::Request { request, reply })
            .await
    }

    pub async fn complete(&self, key: JobKey) -> Result<CompleteOutcome, EngineError> {
        self.call(|reply| SchedulerCommand::Complete { key, reply })
            .await
    }

    pub async fn summary(&self) -> Result<SchedulerSummary, EngineError> {
        self.actor
            .ask(|reply| SchedulerCommand::Summary { reply })
            .await
            .map_err(unavailable)
    }

    /// Runs one reconciliation tick and waits for its report.
    pub async fn reconcile_now(&self) -> Result<ReconcileReport, EngineError> {
        self.actor
            .ask(|reply| SchedulerCommand::Reconcile { reply: Some(reply) })
            .await
            .map_err(unavailable)
    }

    pub async fn check_invariants(&self) -> Result<(), EngineError> {
        self.actor
            .ask(|reply| SchedulerCommand::CheckInvariants { reply })
            .await
            .map_err(unavailable)?
            .map_err(EngineError::InvariantViolation)
    }

    /// Queries every registered agent directly; engine state is untouched.
    pub async fn live_jobs(&self) -> Result<Vec<LiveAgentStatus>, EngineError> {
        let targets = self
            .actor
            .ask(|reply| SchedulerCommand::ProbeTargets { reply })
            .await
            .map_err(unavailable)?;
        Ok(self.probe.live_status(&targets).await)
    }

    pub fn is_running(&self) -> bool {
        !self.actor.is_closed()
    }

    /// Notified whenever cores are freed or a partition is added.
    pub fn capacity_signal(&self) -> Arc<Notify> {
        self.capacity.clone()
    }
}
