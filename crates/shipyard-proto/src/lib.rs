//! # shipyard-proto
//!
//! Wire contract between the Shipyard server and remote execution agents.
//!
//! The message definitions in [`v1`] mirror `proto/agent.proto` field for
//! field. They are derived with `prost` directly so the crate builds without
//! a `protoc` toolchain; the `.proto` file stays the reference for agent
//! implementers in other languages.
//!
//! ## Wire Format Guarantees
//!
//! - Field numbers and enum values are never renumbered or reused
//! - `InvocationResponse` is a oneof: exactly one payload per message
//! - Messages are consumed in the order the agent produced them
//!
//! ## Example
//!
//! ```rust,ignore
//! use shipyard_proto::{AgentClient, v1::InvocationRequest};
//!
//! let mut client = AgentClient::connect(endpoint).await?;
//! let mut stream = client.run_fastlane(request).await?.into_inner();
//! while let Some(response) = stream.message().await? {
//!     let event = shipyard_core::agent::AgentEvent::try_from(response)?;
//! }
//! ```

pub mod client;
pub mod convert;
pub mod error;
pub mod v1;

pub use client::{AgentClient, RUN_FASTLANE_PATH};
pub use error::ProtocolError;
