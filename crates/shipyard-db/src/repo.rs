//! PostgreSQL repositories.

pub mod build;

pub use build::{BuildRecord, PgBuildStore};
