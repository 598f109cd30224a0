//! API v1 routes.

mod agents;
mod jobs;
mod summary;

use axum::Router;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(agents::routes())
        .merge(jobs::routes())
        .merge(summary::routes())
}
