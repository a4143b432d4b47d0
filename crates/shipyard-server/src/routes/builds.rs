//! Build history, logs and artifacts.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use shipyard_core::agent::LogLine;
use shipyard_core::store::ArtifactInfo;
use shipyard_core::{Build, BuildId, CommitSha, ProjectId};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_build))
        .route("/{id}/logs", get(get_logs))
        .route("/{id}/artifacts", get(list_artifacts))
        .route("/project/{project}/commit/{sha}", get(builds_for_commit))
}

fn parse_id(id: &str) -> Result<BuildId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid build id: {}", id)))
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Build>, ApiError> {
    Ok(Json(state.store.get_build(parse_id(&id)?).await?))
}

async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LogLine>>, ApiError> {
    Ok(Json(state.store.logs(parse_id(&id)?).await?))
}

async fn list_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ArtifactInfo>>, ApiError> {
    Ok(Json(state.store.artifacts(parse_id(&id)?).await?))
}

async fn builds_for_commit(
    State(state): State<AppState>,
    Path((project, sha)): Path<(String, String)>,
) -> Result<Json<Vec<Build>>, ApiError> {
    let sha = CommitSha::parse(&sha).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(
        state
            .store
            .builds_for_commit(&ProjectId::new(project), &sha)
            .await?,
    ))
}
