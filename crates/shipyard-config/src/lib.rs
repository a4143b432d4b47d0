//! KDL configuration parsing for Shipyard CI.
//!
//! This crate handles:
//! - Server configuration (shipyard.kdl): projects, triggers, credentials,
//!   scheduler and agent settings
//! - Variable interpolation in build commands
//! - A static `ConfigService` over a parsed configuration

pub mod error;
pub mod server;
pub mod service;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use server::{
    AgentConfig, CredentialConfig, SchedulerSettings, ServerConfig, load_server_config,
    parse_server_config,
};
pub use service::StaticConfigService;
pub use variables::{VariableContext, VariableContextBuilder};
