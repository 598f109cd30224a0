//! Agent API endpoints.
//!
//! Agents register their partition of the global core index space and
//! re-register periodically as a heartbeat. A body carrying only the name is
//! a pure heartbeat.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use hotplug_id::AgentName;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::registry::{AgentRecord, AgentRegistration, RegisterOutcome};
use crate::scheduler::AgentView;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents).post(register_agent))
        .route("/agents/{name}", delete(deregister_agent))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    #[serde(alias = "vm_name")]
    pub name: AgentName,

    /// Base URL of the agent's HTTP interface.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub total_cores: Option<usize>,

    /// First global core index of the agent's range.
    #[serde(default, alias = "core_offset")]
    pub offset: Option<usize>,
}

enum Registration {
    Heartbeat(AgentName),
    Full(AgentRegistration),
}

impl TryFrom<RegisterAgentRequest> for Registration {
    type Error = String;

    fn try_from(req: RegisterAgentRequest) -> Result<Self, Self::Error> {
        match (req.endpoint, req.total_cores, req.offset) {
            (None, None, None) => Ok(Registration::Heartbeat(req.name)),
            (Some(endpoint), Some(total_cores), Some(offset)) => {
                Ok(Registration::Full(AgentRegistration {
                    name: req.name,
                    endpoint,
                    total_cores,
                    offset,
                }))
            }
            _ => Err("endpoint, total_cores and offset must be given together".to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub agent: AgentName,
    pub outcome: &'static str,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ListAgentsResponse {
    pub items: Vec<AgentView>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn register_agent(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<RegisterAgentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id;
    let Json(req) = body.map_err(|e| ApiError::from_json_rejection(e, &request_id))?;

    let registration = Registration::try_from(req).map_err(|message| {
        ApiError::bad_request("invalid_request", message).with_request_id(request_id.clone())
    })?;

    match registration {
        Registration::Heartbeat(agent) => {
            let record = state
                .scheduler()
                .heartbeat(agent)
                .await
                .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
            Ok(Json(HeartbeatResponse {
                agent: record.name,
                outcome: "heartbeat",
                last_seen: record.last_seen,
            })
            .into_response())
        }
        Registration::Full(registration) => {
            let ack = state
                .scheduler()
                .register(registration)
                .await
                .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
            let status = if ack.outcome == RegisterOutcome::Registered {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            Ok((status, Json(ack)).into_response())
        }
    }
}

async fn list_agents(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ListAgentsResponse>, ApiError> {
    let summary = state
        .scheduler()
        .summary()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(ListAgentsResponse {
        items: summary.agents,
    }))
}

async fn deregister_agent(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
) -> Result<Json<AgentRecord>, ApiError> {
    let request_id = ctx.request_id;
    let agent = AgentName::parse(&name).map_err(|e| {
        ApiError::bad_request("invalid_agent_name", e.to_string())
            .with_request_id(request_id.clone())
    })?;

    let record = state
        .scheduler()
        .deregister(agent)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    Ok(Json(record))
}
