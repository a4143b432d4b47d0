//! Worker loop status.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use shipyard_scheduler::WorkerSnapshot;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_workers))
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerSnapshot>> {
    Json(state.workers.workers())
}
