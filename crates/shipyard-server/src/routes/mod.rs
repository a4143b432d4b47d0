//! API routes.

pub mod builds;
pub mod health;
pub mod runners;
pub mod workers;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/runners", runners::router())
        .nest("/workers", workers::router())
        .nest("/builds", builds::router())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::AppState;
    use crate::engine::{Engine, build_agent};
    use crate::services::GitHubProviders;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use shipyard_config::{ServerConfig, StaticConfigService, parse_server_config};
    use shipyard_db::MemoryBuildStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub fn state() -> (AppState, Arc<MemoryBuildStore>) {
        let server: ServerConfig = parse_server_config(r#"agent "local""#).unwrap();
        let store = Arc::new(MemoryBuildStore::new());
        let engine = Engine::new(
            &server,
            StaticConfigService::default(),
            store.clone(),
            build_agent(&server.agent).unwrap(),
            Arc::new(GitHubProviders::new("http://127.0.0.1:1")),
        );
        (AppState::new(&engine, None), store)
    }

    pub async fn call(state: AppState, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = super::router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}
