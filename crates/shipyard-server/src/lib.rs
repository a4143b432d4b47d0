//! Server process for Shipyard CI.
//!
//! Wires the orchestration engine to its collaborators and serves a
//! read-only status HTTP surface.

pub mod engine;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use engine::Engine;
pub use state::AppState;
