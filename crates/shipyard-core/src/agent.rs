//! Agent event vocabulary and the `Agent` trait.
//!
//! An agent executes a single command for one build and streams back an
//! ordered sequence of [`AgentEvent`]s. Each event carries exactly one
//! payload, so consumers branch on the variant rather than probing fields.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{BuildStatus, Error, Result};

/// The command an agent runs for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Executable path or name.
    pub bin: String,
    pub parameters: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Command {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.parameters.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(Error::InvalidInput(format!("unknown log level: {}", other))),
        }
    }
}

/// A line of command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub message: String,
    pub level: LogLevel,
    /// Process exit status; only set on the final line of a stream.
    pub status: Option<i32>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogLine {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: LogLevel::Info,
            status: None,
            timestamp: None,
        }
    }

    /// The closing line of a stream, carrying only the exit status.
    pub fn exit_status(status: i32) -> Self {
        Self {
            message: String::new(),
            level: LogLevel::Info,
            status: Some(status),
            timestamp: None,
        }
    }

    pub fn is_exit_status(&self) -> bool {
        self.message.is_empty() && self.status.is_some()
    }
}

/// One chunk of an artifact. Chunks sharing a filename are concatenated
/// in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactChunk {
    pub filename: String,
    pub chunk: Bytes,
}

/// Terminal failure reported by the agent. The stream closes after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
    pub description: String,
    pub file: Option<String>,
    pub line_number: Option<u32>,
    pub stacktrace: Option<String>,
    pub exit_status: Option<i32>,
}

/// One message of an invocation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The agent moved the invocation to a new state. Never `Pending`
    /// when coming from a well-behaved agent.
    State(BuildStatus),
    Log(LogLine),
    Artifact(ArtifactChunk),
    Error(InvocationError),
}

/// Ordered stream of events for one invocation. An `Err` item means the
/// transport or the wire decoding failed.
pub type AgentStream = BoxStream<'static, Result<AgentEvent>>;

/// Trait for execution agents.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Name of this agent backend.
    fn name(&self) -> &'static str;

    /// Start an invocation and return its event stream.
    async fn invoke(&self, command: Command) -> Result<AgentStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("fastlane").arg("test").env("CI", "true");
        assert_eq!(cmd.bin, "fastlane");
        assert_eq!(cmd.parameters, vec!["test"]);
        assert_eq!(cmd.env.get("CI").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Fatal.as_str(), "fatal");
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_exit_status_line() {
        assert!(LogLine::exit_status(0).is_exit_status());
        assert!(!LogLine::info("building").is_exit_status());
    }
}
