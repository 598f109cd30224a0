//! Job API endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use hotplug_id::{AgentName, JobName};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::ledger::JobKey;
use crate::scheduler::{CompleteOutcome, JobRequest, RequestOutcome};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(request_cores))
        .route("/jobs/complete", post(complete_job))
}

#[derive(Debug, Deserialize)]
pub struct RequestCoresBody {
    #[serde(alias = "vm")]
    pub agent: AgentName,
    pub job: JobName,
    pub pid: u32,
    #[serde(alias = "cores")]
    pub cores_requested: usize,
}

impl From<RequestCoresBody> for JobRequest {
    fn from(body: RequestCoresBody) -> Self {
        JobRequest {
            agent: body.agent,
            job: body.job,
            pid: body.pid,
            cores_requested: body.cores_requested,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteJobBody {
    #[serde(alias = "vm")]
    pub agent: AgentName,
    pub job: JobName,
}

/// 201 when cores were granted, 202 when the request was queued.
async fn request_cores(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<RequestCoresBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let Json(body) = body.map_err(|e| ApiError::from_json_rejection(e, &request_id))?;

    let outcome = state
        .scheduler()
        .request(body.into())
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;

    let status = match outcome {
        RequestOutcome::Allocated { .. } => StatusCode::CREATED,
        RequestOutcome::Queued { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

async fn complete_job(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<CompleteJobBody>, JsonRejection>,
) -> Result<Json<CompleteOutcome>, ApiError> {
    let request_id = ctx.request_id;
    let Json(body) = body.map_err(|e| ApiError::from_json_rejection(e, &request_id))?;

    let outcome = state
        .scheduler()
        .complete(JobKey::new(body.agent, body.job))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;
    Ok(Json(outcome))
}
