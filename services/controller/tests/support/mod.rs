//! Shared helpers for controller integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hotplug_controller::actors::ActorRef;
use hotplug_controller::admission::AdmissionPolicy;
use hotplug_controller::agent_client::{
    AgentClient, AgentError, AgentJobStatus, AgentStatus, AllocateRequest, ReleaseRequest,
};
use hotplug_controller::event_log::{EventSink, MemoryEventSink};
use hotplug_controller::registry::AgentRegistration;
use hotplug_controller::scheduler::{spawn_scheduler, JobRequest, SchedulerConfig, SchedulerHandle};
use hotplug_id::{AgentName, JobName};

pub const AGENT_TIMEOUT: Duration = Duration::from_millis(200);

pub fn agent(name: &str) -> AgentName {
    AgentName::parse(name).unwrap()
}

pub fn job(name: &str) -> JobName {
    JobName::parse(name).unwrap()
}

pub fn endpoint(agent: &str) -> String {
    format!("http://{agent}.test:6000")
}

pub fn registration(name: &str, offset: usize, total_cores: usize) -> AgentRegistration {
    AgentRegistration {
        name: agent(name),
        endpoint: endpoint(name),
        total_cores,
        offset,
    }
}

pub fn job_request(agent_name: &str, job_name: &str, cores: usize) -> JobRequest {
    JobRequest {
        agent: agent(agent_name),
        job: job(job_name),
        pid: 4242,
        cores_requested: cores,
    }
}

/// A call an agent received from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Allocate { endpoint: String, request: AllocateRequest },
    Release { endpoint: String, request: ReleaseRequest },
}

#[derive(Debug, Default)]
struct Script {
    /// endpoint -> job -> cpu percent reported by `status`.
    cpu: HashMap<String, HashMap<String, f64>>,
    hanging: HashSet<String>,
    failing: HashSet<String>,
    calls: Vec<RecordedCall>,
    status_queries: usize,
}

/// In-process `AgentClient` whose answers are scripted per agent.
#[derive(Debug, Default)]
pub struct ScriptedAgents {
    script: Mutex<Script>,
}

impl ScriptedAgents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `agent` report `job` at `cpu_percent`.
    pub fn set_cpu(&self, agent: &str, job: &str, cpu_percent: f64) {
        self.script
            .lock()
            .unwrap()
            .cpu
            .entry(endpoint(agent))
            .or_default()
            .insert(job.to_string(), cpu_percent);
    }

    /// Calls to `agent` never answer.
    pub fn hang(&self, agent: &str) {
        self.script.lock().unwrap().hanging.insert(endpoint(agent));
    }

    /// Every call to `agent` fails as unreachable.
    pub fn fail(&self, agent: &str) {
        self.script.lock().unwrap().failing.insert(endpoint(agent));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn releases_for(&self, agent: &str) -> Vec<ReleaseRequest> {
        let endpoint = endpoint(agent);
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Release { endpoint: e, request } if e == endpoint => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn status_queries(&self) -> usize {
        self.script.lock().unwrap().status_queries
    }

    async fn hang_if_scripted(&self, endpoint: &str) {
        let hang = self.script.lock().unwrap().hanging.contains(endpoint);
        if hang {
            std::future::pending::<()>().await;
        }
    }

    fn check_failing(&self, endpoint: &str) -> Result<(), AgentError> {
        if self.script.lock().unwrap().failing.contains(endpoint) {
            return Err(AgentError::Unreachable {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AgentClient for ScriptedAgents {
    async fn status(&self, endpoint: &str) -> Result<AgentStatus, AgentError> {
        let hang = {
            let mut script = self.script.lock().unwrap();
            script.status_queries += 1;
            script.hanging.contains(endpoint)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.check_failing(endpoint)?;

        let script = self.script.lock().unwrap();
        let jobs = script
            .cpu
            .get(endpoint)
            .map(|jobs| {
                jobs.iter()
                    .map(|(job, cpu)| AgentJobStatus {
                        job: job.clone(),
                        pid: Some(4242),
                        cores: Vec::new(),
                        cpu_percent: *cpu,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(AgentStatus {
            vm: endpoint.to_string(),
            total_cores: 0,
            offset: 0,
            jobs,
        })
    }

    async fn allocate(&self, endpoint: &str, request: &AllocateRequest) -> Result<(), AgentError> {
        self.hang_if_scripted(endpoint).await;
        self.check_failing(endpoint)?;
        self.script.lock().unwrap().calls.push(RecordedCall::Allocate {
            endpoint: endpoint.to_string(),
            request: request.clone(),
        });
        Ok(())
    }

    async fn release(&self, endpoint: &str, request: &ReleaseRequest) -> Result<(), AgentError> {
        self.hang_if_scripted(endpoint).await;
        self.check_failing(endpoint)?;
        self.script.lock().unwrap().calls.push(RecordedCall::Release {
            endpoint: endpoint.to_string(),
            request: request.clone(),
        });
        Ok(())
    }
}

/// A running scheduler wired to scripted agents and an in-memory sink.
pub struct Harness {
    pub scheduler: SchedulerHandle,
    pub actor: ActorRef,
    pub agents: Arc<ScriptedAgents>,
    pub events: Arc<MemoryEventSink>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_policy(AdmissionPolicy::default())
    }

    pub fn with_policy(policy: AdmissionPolicy) -> Self {
        let agents = ScriptedAgents::new();
        let events = Arc::new(MemoryEventSink::new());
        let config = SchedulerConfig {
            policy,
            agent_timeout: AGENT_TIMEOUT,
            ..SchedulerConfig::default()
        };
        let sink: Arc<dyn EventSink> = events.clone();
        let (scheduler, actor) = spawn_scheduler(config, agents.clone(), sink);
        Self {
            scheduler,
            actor,
            agents,
            events,
        }
    }

    pub async fn register(&self, name: &str, offset: usize, total_cores: usize) {
        self.scheduler
            .register(registration(name, offset, total_cores))
            .await
            .unwrap();
    }

    pub async fn assert_invariants(&self) {
        self.scheduler.check_invariants().await.unwrap();
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
