//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("provider query failed for {project}: {source}")]
    Provider {
        project: String,
        #[source]
        source: shipyard_core::Error,
    },

    #[error("build store failed: {0}")]
    Store(#[source] shipyard_core::Error),

    #[error("task queue is closed")]
    QueueClosed,

    #[error("iteration panicked: {0}")]
    Panicked(String),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    pub(crate) fn provider(project: &shipyard_core::ProjectId, source: shipyard_core::Error) -> Self {
        SchedulerError::Provider {
            project: project.to_string(),
            source,
        }
    }
}

impl From<SchedulerError> for shipyard_core::Error {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Provider { source, .. } | SchedulerError::Store(source) => source,
            other => shipyard_core::Error::Internal(other.to_string()),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
