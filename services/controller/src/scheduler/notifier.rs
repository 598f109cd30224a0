//! Post-commit agent notifications.
//!
//! Allocation state is committed before agents hear about it. Each agent
//! has its own lane: calls to one agent arrive in commit order, and a slow
//! agent only holds up its own lane. A failed or timed-out call is logged
//! and never rolls anything back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hotplug_id::AgentName;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::agent_client::{AgentClient, AgentError, AllocateRequest, ReleaseRequest};

/// A call owed to an agent after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCall {
    Allocate {
        agent: AgentName,
        endpoint: String,
        request: AllocateRequest,
    },
    Release {
        agent: AgentName,
        endpoint: String,
        request: ReleaseRequest,
    },
}

impl AgentCall {
    pub fn agent(&self) -> &AgentName {
        match self {
            AgentCall::Allocate { agent, .. } | AgentCall::Release { agent, .. } => agent,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AgentCall::Allocate { .. } => "allocate",
            AgentCall::Release { .. } => "release",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentNotifier {
    tx: mpsc::UnboundedSender<AgentCall>,
}

impl AgentNotifier {
    /// Starts the routing task. Lanes are spawned on first use.
    pub fn spawn(client: Arc<dyn AgentClient>, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentCall>();
        tokio::spawn(async move {
            let mut lanes: HashMap<AgentName, mpsc::Sender<AgentCall>> = HashMap::new();
            while let Some(call) = rx.recv().await {
                let lane = lanes
                    .entry(call.agent().clone())
                    .or_insert_with(|| {
                        spawn_lane(client.clone(), timeout, call.agent().clone())
                    });
                match lane.try_send(call) {
                    Ok(()) => {}
                    Err(TrySendError::Full(call)) => warn!(
                        agent = %call.agent(),
                        call = call.kind(),
                        depth = LANE_DEPTH,
                        "AgentUnreachable: agent lane full; dropping call"
                    ),
                    Err(TrySendError::Closed(call)) => {
                        warn!(
                            agent = %call.agent(),
                            call = call.kind(),
                            "Agent lane closed; dropping call"
                        );
                        lanes.remove(call.agent());
                    }
                }
            }
            debug!("Agent notifier stopped");
        });
        Self { tx }
    }

    /// Queues calls for delivery, in order per agent.
    pub fn dispatch(&self, calls: Vec<AgentCall>) {
        for call in calls {
            if let Err(e) = self.tx.send(call) {
                warn!(agent = %e.0.agent(), "Agent notifier is gone; dropping call");
            }
        }
    }
}

/// Undelivered calls held for one agent before new ones are dropped.
pub const LANE_DEPTH: usize = 64;

fn spawn_lane(
    client: Arc<dyn AgentClient>,
    timeout: Duration,
    agent: AgentName,
) -> mpsc::Sender<AgentCall> {
    let (tx, mut rx) = mpsc::channel::<AgentCall>(LANE_DEPTH);
    tokio::spawn(async move {
        while let Some(call) = rx.recv().await {
            deliver(client.as_ref(), timeout, call).await;
        }
        debug!(agent = %agent, "Agent lane stopped");
    });
    tx
}

async fn deliver(client: &dyn AgentClient, timeout: Duration, call: AgentCall) {
    let kind = call.kind();
    let call_future = async {
        match &call {
            AgentCall::Allocate {
                endpoint, request, ..
            } => client.allocate(endpoint, request).await,
            AgentCall::Release {
                endpoint, request, ..
            } => client.release(endpoint, request).await,
        }
    };

    let result = match tokio::time::timeout(timeout, call_future).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout {
            endpoint: endpoint_of(&call).to_string(),
        }),
    };

    match result {
        Ok(()) => debug!(agent = %call.agent(), call = kind, "Agent acknowledged"),
        Err(e) => warn!(
            agent = %call.agent(),
            call = kind,
            error = %e,
            "AgentUnreachable: call not acknowledged; engine state kept"
        ),
    }
}

fn endpoint_of(call: &AgentCall) -> &str {
    match call {
        AgentCall::Allocate { endpoint, .. } | AgentCall::Release { endpoint, .. } => endpoint,
    }
}
