//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if let Some(pool) = &state.pool {
        sqlx::query("SELECT 1")
            .execute(pool)
            .await
            .map_err(|e| ApiError::Unavailable(format!("database unreachable: {}", e)))?;
    }

    Ok(Json(json!({
        "status": "ready",
        "runners": state.runners.active_count(),
        "queued": state.runners.queued_count(),
        "workers": state.workers.workers().len(),
    })))
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{call, state};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_ready_reports_counts() {
        let (state, _) = state();

        let (status, body) = call(state.clone(), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(state, Method::GET, "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["runners"], 0);
        assert_eq!(body["workers"], 0);
    }
}
