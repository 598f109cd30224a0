//! HTTP client for the controller API.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CliError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.get(self.url(path)).send().await?;
        self.handle_response(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        self.handle_response(response).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.client.delete(self.url(path)).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to parse response: {}", e)))
        } else {
            self.handle_error(response).await
        }
    }

    /// Maps a problem-details body onto `CliError::Api`.
    async fn handle_error<T>(&self, response: reqwest::Response) -> Result<T, CliError> {
        let status = response.status().as_u16();
        let problem: Problem = response.json().await.unwrap_or_else(|_| Problem {
            code: "unknown".to_string(),
            title: None,
            detail: None,
            request_id: None,
            retryable: status == 503,
        });

        let message = problem
            .detail
            .or(problem.title)
            .unwrap_or_else(|| "Unknown error".to_string());
        Err(CliError::api(
            status,
            problem.code,
            message,
            problem.request_id,
            problem.retryable,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct Problem {
    code: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url_building() {
        let client = ApiClient::new("http://127.0.0.1:5000/").unwrap();
        assert_eq!(client.url("/v1/summary"), "http://127.0.0.1:5000/v1/summary");
    }

    #[tokio::test]
    async fn test_post_sends_body_and_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/jobs"))
            .and(body_json(json!({ "agent": "agentA", "job": "J1" })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({ "status": "allocated", "cores": [0, 1] })),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let body: Value = client
            .post("/v1/jobs", &json!({ "agent": "agentA", "job": "J1" }))
            .await
            .unwrap();
        assert_eq!(body["cores"], json!([0, 1]));
    }

    #[tokio::test]
    async fn test_problem_details_become_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/agents/agentA"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "type": "https://hotplug.dev/problems/agent_busy",
                "title": "Conflict",
                "status": 409,
                "detail": "agent agentA still owns cores",
                "code": "agent_busy",
                "request_id": "req-1",
                "retryable": false,
                "retry_after_seconds": 0,
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client.delete::<Value>("/v1/agents/agentA").await.unwrap_err();
        match err {
            CliError::Api {
                status,
                code,
                message,
                request_id,
                retryable,
            } => {
                assert_eq!(status, 409);
                assert_eq!(code, "agent_busy");
                assert_eq!(message, "agent agentA still owns cores");
                assert_eq!(request_id.as_deref(), Some("req-1"));
                assert!(!retryable);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_error_body_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/summary"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client.get::<Value>("/v1/summary").await.unwrap_err();
        assert_eq!(err.code(), Some("unknown"));
        assert!(matches!(err, CliError::Api { retryable: true, .. }));
    }
}
