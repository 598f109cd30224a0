//! Core pool scheduler.
//!
//! The scheduler is responsible for:
//! - Tracking agent partitions of the global core index space
//! - Admitting job requests from free cores, pooled free cores, or by
//!   reclaiming idle cores from running jobs
//! - Queueing requests that cannot be served and retrying them on each tick
//! - Emitting allocation events and notifying agents after each commit

mod actor;
mod handle;
mod notifier;
mod state;
mod view;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::actors::{self, ActorRef};
use crate::admission::AdmissionPolicy;
use crate::agent_client::AgentClient;
use crate::event_log::EventSink;
use crate::probe::UtilizationProbe;

pub use actor::{SchedulerActor, SchedulerCommand};
pub use handle::SchedulerHandle;
pub use notifier::{AgentCall, AgentNotifier};
pub use state::{Admission, Effects, SchedulerState, SUMMARY_ACTIVITY_LINES};
pub use view::*;
pub use worker::ReconcileWorker;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub policy: AdmissionPolicy,
    pub mailbox_size: usize,
    pub activity_capacity: usize,
    /// Timeout for every call to an agent.
    pub agent_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: AdmissionPolicy::default(),
            mailbox_size: 256,
            activity_capacity: 400,
            agent_timeout: Duration::from_secs(6),
        }
    }
}

/// Starts the scheduler actor and its agent notifier.
pub fn spawn_scheduler(
    config: SchedulerConfig,
    client: Arc<dyn AgentClient>,
    sink: Arc<dyn EventSink>,
) -> (SchedulerHandle, ActorRef) {
    let (handle, mailbox) = actors::mailbox::<SchedulerCommand>("scheduler", config.mailbox_size);
    let probe = UtilizationProbe::new(client.clone(), config.agent_timeout);
    let notifier = AgentNotifier::spawn(client, config.agent_timeout);
    let capacity = Arc::new(Notify::new());

    let actor = SchedulerActor::new(
        SchedulerState::new(config.policy, config.activity_capacity),
        sink,
        notifier,
        probe.clone(),
        handle.downgrade(),
        capacity.clone(),
    );
    let actor_ref = actors::spawn(actor, mailbox);

    (SchedulerHandle::new(handle, probe, capacity), actor_ref)
}
