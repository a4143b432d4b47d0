//! Execution agent backends for Shipyard CI.
//!
//! Provides `Agent` implementations:
//! - Remote gRPC agent (production, usually a macOS build host)
//! - Local child process (development)

pub mod grpc;
pub mod local;

pub use grpc::GrpcAgent;
pub use local::LocalAgent;
pub use shipyard_core::agent::{Agent, AgentEvent, AgentStream, Command};
