//! Health endpoints: `/healthz` for the HTTP server, `/readyz` for the
//! scheduler actor, `/livez` for plain liveness probes.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// How long `/readyz` waits for the scheduler to answer.
const READY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`.
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// `ok` or `unavailable`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthResponse {
    fn new(ok: bool) -> Self {
        Self {
            status: if ok { "ok" } else { "degraded" }.to_string(),
            service: "controller".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
            components: BTreeMap::new(),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse::new(true))
}

/// Ready once the scheduler answers a summary within `READY_TIMEOUT`.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = if !state.scheduler().is_running() {
        ComponentStatus {
            status: "unavailable".to_string(),
            message: Some("scheduler mailbox is closed".to_string()),
        }
    } else {
        scheduler_status(&state).await
    };

    let ready = scheduler.status == "ok";
    let mut body = HealthResponse::new(ready);
    body.components.insert("scheduler".to_string(), scheduler);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn scheduler_status(state: &AppState) -> ComponentStatus {
    match tokio::time::timeout(READY_TIMEOUT, state.scheduler().summary()).await {
        Ok(Ok(summary)) => ComponentStatus {
            status: "ok".to_string(),
            message: Some(format!(
                "{} agents, {} cores, {} pending",
                summary.agents.len(),
                summary.totals.total_cores,
                summary.totals.pending
            )),
        },
        Ok(Err(e)) => ComponentStatus {
            status: "unavailable".to_string(),
            message: Some(e.to_string()),
        },
        Err(_) => ComponentStatus {
            status: "unavailable".to_string(),
            message: Some("scheduler did not answer in time".to_string()),
        },
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}
