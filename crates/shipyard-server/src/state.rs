//! Application state.

use shipyard_core::store::BuildStore;
use shipyard_scheduler::{BuildRunnerService, WorkerService};
use sqlx::PgPool;
use std::sync::Arc;

use crate::engine::Engine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Set when builds are stored in PostgreSQL.
    pub pool: Option<PgPool>,
    pub store: Arc<dyn BuildStore>,
    pub runners: BuildRunnerService,
    pub workers: Arc<WorkerService>,
}

impl AppState {
    pub fn new(engine: &Engine, pool: Option<PgPool>) -> Self {
        Self {
            pool,
            store: engine.store.clone(),
            runners: engine.runners.clone(),
            workers: engine.workers.clone(),
        }
    }
}
