//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for shipyard_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => shipyard_core::Error::NotFound(msg),
            DbError::Conflict(msg) => shipyard_core::Error::Conflict(msg),
            other => shipyard_core::Error::Storage(other.to_string()),
        }
    }
}
