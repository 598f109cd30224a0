//! Read-only views: the engine summary and live agent status.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::probe::LiveAgentStatus;
use crate::scheduler::SchedulerSummary;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/summary", get(get_summary))
        .route("/live", get(get_live))
}

#[derive(Debug, Serialize)]
pub struct LiveResponse {
    pub items: Vec<LiveAgentStatus>,
}

async fn get_summary(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<SchedulerSummary>, ApiError> {
    let summary = state
        .scheduler()
        .summary()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(summary))
}

/// Asks every agent for its current jobs. Unreachable agents are listed
/// with `reachable: false`.
async fn get_live(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<LiveResponse>, ApiError> {
    let items = state
        .scheduler()
        .live_jobs()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(LiveResponse { items }))
}
