//! Active build runners.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use shipyard_core::{CommitSha, ProjectId};
use shipyard_scheduler::RunnerSnapshot;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_runners))
        .route("/{project}/{sha}", get(get_runner).delete(abort_runner))
}

#[derive(Debug, Serialize)]
struct AbortResponse {
    project: ProjectId,
    sha: CommitSha,
    aborted: bool,
}

fn parse_key(project: String, sha: &str) -> Result<(ProjectId, CommitSha), ApiError> {
    let sha = CommitSha::parse(sha).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok((ProjectId::new(project), sha))
}

async fn list_runners(State(state): State<AppState>) -> Json<Vec<RunnerSnapshot>> {
    Json(state.runners.snapshots())
}

async fn get_runner(
    State(state): State<AppState>,
    Path((project, sha)): Path<(String, String)>,
) -> Result<Json<RunnerSnapshot>, ApiError> {
    let (project, sha) = parse_key(project, &sha)?;
    state
        .runners
        .lookup(&project, &sha)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no runner for {} at {}", project, sha)))
}

async fn abort_runner(
    State(state): State<AppState>,
    Path((project, sha)): Path<(String, String)>,
) -> Result<(StatusCode, Json<AbortResponse>), ApiError> {
    let (project, sha) = parse_key(project, &sha)?;
    if !state.runners.abort(&project, &sha) {
        return Err(ApiError::NotFound(format!(
            "no runner for {} at {}",
            project, sha
        )));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(AbortResponse {
            project,
            sha,
            aborted: true,
        }),
    ))
}
