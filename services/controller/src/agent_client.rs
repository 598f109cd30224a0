//! Client for the agent-side HTTP contract.
//!
//! Agents expose three endpoints:
//! - `GET {endpoint}/status` with per-job CPU usage
//! - `POST {endpoint}/allocate` to pin a job to cores
//! - `POST {endpoint}/release` to shrink or clear a job's cores
//!
//! Every failure is an `AgentError`. The engine treats all of them as
//! "agent unreachable" and never lets one abort an admission.

use std::time::Duration;

use async_trait::async_trait;
use hotplug_id::JobName;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Wire types
// =============================================================================

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    #[serde(default)]
    pub vm: String,
    #[serde(default)]
    pub total_cores: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub jobs: Vec<AgentJobStatus>,
}

/// One job as reported by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentJobStatus {
    pub job: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub cores: Vec<usize>,
    #[serde(default)]
    pub cpu_percent: f64,
}

/// Body of `POST /allocate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub job: JobName,
    pub pid: u32,
    pub cores: Vec<usize>,
}

/// Body of `POST /release`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub job: JobName,
    /// Cores taken away from the job.
    pub released: Vec<usize>,
    /// Cores the job keeps; empty when the job completed.
    pub keep_cores: Vec<usize>,
}

/// Acknowledgement returned by `allocate` and `release`.
#[derive(Debug, Clone, Deserialize)]
struct AgentAck {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

impl Default for AgentAck {
    fn default() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent at {endpoint} is unreachable: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("agent at {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("agent at {endpoint} rejected the call ({status}): {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("agent at {endpoint} sent an undecodable response: {message}")]
    Decode { endpoint: String, message: String },
}

// =============================================================================
// Client trait
// =============================================================================

#[async_trait]
pub trait AgentClient: Send + Sync + 'static {
    async fn status(&self, endpoint: &str) -> Result<AgentStatus, AgentError>;

    async fn allocate(&self, endpoint: &str, request: &AllocateRequest) -> Result<(), AgentError>;

    async fn release(&self, endpoint: &str, request: &ReleaseRequest) -> Result<(), AgentError>;
}

/// `AgentClient` over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
}

impl HttpAgentClient {
    /// Creates a client whose every call is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn post_ack<T: Serialize + Sync>(
        &self,
        endpoint: &str,
        path: &str,
        body: &T,
    ) -> Result<(), AgentError> {
        let url = format!("{endpoint}/{path}");
        debug!(url = %url, "Calling agent");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport(endpoint, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport(endpoint, e))?;

        // Agents that answer with an empty or non-JSON body are judged by
        // status code alone.
        let ack: AgentAck = serde_json::from_str(&text).unwrap_or_default();

        if !status.is_success() || !ack.ok {
            return Err(AgentError::Rejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: ack.error.unwrap_or(text),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn status(&self, endpoint: &str) -> Result<AgentStatus, AgentError> {
        let url = format!("{endpoint}/status");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Rejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_transport(endpoint, e))?;
        serde_json::from_slice(&bytes).map_err(|e| AgentError::Decode {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    async fn allocate(&self, endpoint: &str, request: &AllocateRequest) -> Result<(), AgentError> {
        self.post_ack(endpoint, "allocate", request).await
    }

    async fn release(&self, endpoint: &str, request: &ReleaseRequest) -> Result<(), AgentError> {
        self.post_ack(endpoint, "release", request).await
    }
}

fn map_transport(endpoint: &str, err: reqwest::Error) -> AgentError {
    if err.is_timeout() {
        AgentError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else if err.is_decode() {
        AgentError::Decode {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    } else {
        AgentError::Unreachable {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpAgentClient {
        HttpAgentClient::new(Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn test_status_decodes_agent_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "vm": "agentA",
                "total_cores": 4,
                "offset": 0,
                "jobs": [{"job": "J1", "pid": 4242, "cores": [0, 1, 2, 3], "cpu_percent": 12.5}]
            })))
            .mount(&server)
            .await;

        let status = client().status(&server.uri()).await.unwrap();
        assert_eq!(status.vm, "agentA");
        assert_eq!(status.jobs.len(), 1);
        assert_eq!(status.jobs[0].cores, vec![0, 1, 2, 3]);
        assert_eq!(status.jobs[0].cpu_percent, 12.5);
    }

    #[tokio::test]
    async fn test_status_garbage_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client().status(&server.uri()).await.unwrap_err();
        assert!(matches!(err, AgentError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_status_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = client().status(&server.uri()).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_allocate_sends_contract_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/allocate"))
            .and(body_json(serde_json::json!({"job": "J1", "pid": 7, "cores": [0, 1]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let request = AllocateRequest {
            job: JobName::parse("J1").unwrap(),
            pid: 7,
            cores: vec![0, 1],
        };
        client().allocate(&server.uri(), &request).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_not_ok_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/release"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"ok": false, "error": "job not found"})),
            )
            .mount(&server)
            .await;

        let request = ReleaseRequest {
            job: JobName::parse("J1").unwrap(),
            released: vec![3],
            keep_cores: vec![0, 1, 2],
        };
        let err = client().release(&server.uri(), &request).await.unwrap_err();
        assert_eq!(
            err,
            AgentError::Rejected {
                endpoint: server.uri(),
                status: 404,
                message: "job not found".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let err = client().status("http://127.0.0.1:9").await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Unreachable { .. } | AgentError::Timeout { .. }
        ));
    }
}
