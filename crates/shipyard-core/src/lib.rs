//! Core domain types and traits for Shipyard CI.
//!
//! This crate contains:
//! - Resource identifiers and the shared error type
//! - Projects, job triggers and provider credentials
//! - Build records and the build status transition graph
//! - The agent event vocabulary and the `Agent` trait
//! - Capability traits for the external collaborators (provider API,
//!   durable build store, project configuration)

pub mod agent;
pub mod build;
pub mod error;
pub mod id;
pub mod project;
pub mod provider;
pub mod store;

pub use build::{Build, BuildId, BuildStatus, CommitSha};
pub use error::{Error, Result};
pub use id::ResourceId;
pub use project::{Project, ProjectId};
