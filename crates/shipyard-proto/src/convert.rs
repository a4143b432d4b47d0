//! Conversions between wire messages and `shipyard-core` types.
//!
//! Decoding matches explicitly on the populated oneof variant; a response
//! without a payload or with an unknown enum value is a protocol error.

use chrono::{DateTime, Utc};
use shipyard_core::BuildStatus;
use shipyard_core::agent::{self, AgentEvent, ArtifactChunk, LogLevel, LogLine};

use crate::ProtocolError;
use crate::v1::{self, invocation_response::Response};

impl From<&agent::Command> for v1::Command {
    fn from(command: &agent::Command) -> Self {
        Self {
            bin: command.bin.clone(),
            parameters: command.parameters.clone(),
            env: command.env.clone(),
        }
    }
}

impl From<&agent::Command> for v1::InvocationRequest {
    fn from(command: &agent::Command) -> Self {
        Self {
            command: Some(command.into()),
        }
    }
}

impl From<v1::State> for BuildStatus {
    fn from(state: v1::State) -> Self {
        match state {
            v1::State::Pending => BuildStatus::Pending,
            v1::State::Running => BuildStatus::Running,
            v1::State::Finishing => BuildStatus::Finishing,
            v1::State::Succeeded => BuildStatus::Succeeded,
            v1::State::Failed => BuildStatus::Failed,
            v1::State::Broken => BuildStatus::Broken,
            v1::State::Rejected => BuildStatus::Rejected,
        }
    }
}

impl From<BuildStatus> for v1::State {
    fn from(status: BuildStatus) -> Self {
        match status {
            BuildStatus::Pending => v1::State::Pending,
            BuildStatus::Running => v1::State::Running,
            BuildStatus::Finishing => v1::State::Finishing,
            BuildStatus::Succeeded => v1::State::Succeeded,
            BuildStatus::Failed => v1::State::Failed,
            BuildStatus::Broken => v1::State::Broken,
            BuildStatus::Rejected => v1::State::Rejected,
        }
    }
}

impl From<v1::log::Level> for LogLevel {
    fn from(level: v1::log::Level) -> Self {
        match level {
            v1::log::Level::Debug => LogLevel::Debug,
            v1::log::Level::Info => LogLevel::Info,
            v1::log::Level::Warn => LogLevel::Warn,
            v1::log::Level::Error => LogLevel::Error,
            v1::log::Level::Fatal => LogLevel::Fatal,
        }
    }
}

impl From<LogLevel> for v1::log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => v1::log::Level::Debug,
            LogLevel::Info => v1::log::Level::Info,
            LogLevel::Warn => v1::log::Level::Warn,
            LogLevel::Error => v1::log::Level::Error,
            LogLevel::Fatal => v1::log::Level::Fatal,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

impl TryFrom<v1::Log> for LogLine {
    type Error = ProtocolError;

    fn try_from(log: v1::Log) -> Result<Self, ProtocolError> {
        let level = v1::log::Level::try_from(log.level)
            .map_err(|_| ProtocolError::UnknownLogLevel(log.level))?;
        let timestamp = match log.timestamp {
            0 => None,
            secs => DateTime::<Utc>::from_timestamp(secs as i64, 0),
        };

        // A zero status on the wire is indistinguishable from an unset one, so
        // an empty line only carries an exit status when it is non-zero. The
        // runner decides whether a trailing blank line closed the stream.
        let status = (log.message.is_empty() && log.status != 0).then_some(log.status);

        Ok(LogLine {
            message: log.message,
            level: level.into(),
            status,
            timestamp,
        })
    }
}

impl From<v1::InvocationError> for agent::InvocationError {
    fn from(err: v1::InvocationError) -> Self {
        Self {
            description: err.description,
            file: non_empty(err.file),
            line_number: (err.line_number != 0).then_some(err.line_number),
            stacktrace: non_empty(err.stacktrace),
            exit_status: (err.exit_status != 0).then_some(err.exit_status),
        }
    }
}

impl TryFrom<v1::InvocationResponse> for AgentEvent {
    type Error = ProtocolError;

    fn try_from(response: v1::InvocationResponse) -> Result<Self, ProtocolError> {
        match response.response {
            None => Err(ProtocolError::EmptyResponse),
            Some(Response::State(value)) => {
                let state =
                    v1::State::try_from(value).map_err(|_| ProtocolError::UnknownState(value))?;
                Ok(AgentEvent::State(state.into()))
            }
            Some(Response::Log(log)) => Ok(AgentEvent::Log(log.try_into()?)),
            Some(Response::Artifact(artifact)) => {
                if artifact.filename.is_empty() {
                    return Err(ProtocolError::MissingFilename);
                }
                Ok(AgentEvent::Artifact(ArtifactChunk {
                    filename: artifact.filename,
                    chunk: artifact.chunk,
                }))
            }
            Some(Response::Error(err)) => Ok(AgentEvent::Error(err.into())),
        }
    }
}

impl From<AgentEvent> for v1::InvocationResponse {
    fn from(event: AgentEvent) -> Self {
        let response = match event {
            AgentEvent::State(status) => Response::State(v1::State::from(status) as i32),
            AgentEvent::Log(line) => Response::Log(v1::Log {
                status: line.status.unwrap_or_default(),
                level: v1::log::Level::from(line.level) as i32,
                timestamp: line
                    .timestamp
                    .map(|t| t.timestamp().max(0) as u64)
                    .unwrap_or_default(),
                message: line.message,
            }),
            AgentEvent::Artifact(artifact) => Response::Artifact(v1::Artifact {
                chunk: artifact.chunk,
                filename: artifact.filename,
            }),
            AgentEvent::Error(err) => Response::Error(v1::InvocationError {
                description: err.description,
                file: err.file.unwrap_or_default(),
                line_number: err.line_number.unwrap_or_default(),
                stacktrace: err.stacktrace.unwrap_or_default(),
                exit_status: err.exit_status.unwrap_or_default(),
            }),
        };

        Self {
            response: Some(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_decode_state() {
        let response = v1::InvocationResponse {
            response: Some(Response::State(v1::State::Finishing as i32)),
        };
        assert_eq!(
            AgentEvent::try_from(response),
            Ok(AgentEvent::State(BuildStatus::Finishing))
        );
    }

    #[test]
    fn test_decode_rejects_empty_and_unknown() {
        let empty = v1::InvocationResponse { response: None };
        assert_eq!(
            AgentEvent::try_from(empty),
            Err(ProtocolError::EmptyResponse)
        );

        let unknown = v1::InvocationResponse {
            response: Some(Response::State(42)),
        };
        assert_eq!(
            AgentEvent::try_from(unknown),
            Err(ProtocolError::UnknownState(42))
        );
    }

    fn log(message: &str, status: i32) -> v1::InvocationResponse {
        v1::InvocationResponse {
            response: Some(Response::Log(v1::Log {
                message: message.to_string(),
                level: v1::log::Level::Info as i32,
                status,
                timestamp: 0,
            })),
        }
    }

    #[test]
    fn test_decode_exit_status_log() {
        match AgentEvent::try_from(log("", 65)).unwrap() {
            AgentEvent::Log(line) => {
                assert!(line.is_exit_status());
                assert_eq!(line.status, Some(65));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_blank_line_is_ordinary_output() {
        match AgentEvent::try_from(log("", 0)).unwrap() {
            AgentEvent::Log(line) => {
                assert!(!line.is_exit_status());
                assert_eq!(line.message, "");
                assert_eq!(line.status, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_artifact_requires_filename() {
        let response = v1::InvocationResponse {
            response: Some(Response::Artifact(v1::Artifact {
                chunk: Bytes::from_static(b"data"),
                filename: String::new(),
            })),
        };
        assert_eq!(
            AgentEvent::try_from(response),
            Err(ProtocolError::MissingFilename)
        );
    }

    #[test]
    fn test_decode_error_maps_empty_fields_to_none() {
        let response = v1::InvocationResponse {
            response: Some(Response::Error(v1::InvocationError {
                description: "lane crashed".to_string(),
                file: String::new(),
                line_number: 0,
                stacktrace: String::new(),
                exit_status: 2,
            })),
        };

        match AgentEvent::try_from(response).unwrap() {
            AgentEvent::Error(err) => {
                assert_eq!(err.description, "lane crashed");
                assert_eq!(err.file, None);
                assert_eq!(err.line_number, None);
                assert_eq!(err.exit_status, Some(2));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_request_from_command() {
        let command = agent::Command::new("fastlane").arg("test").env("CI", "1");
        let request = v1::InvocationRequest::from(&command);
        let wire = request.command.unwrap();
        assert_eq!(wire.bin, "fastlane");
        assert_eq!(wire.parameters, vec!["test"]);
        assert_eq!(wire.env.get("CI").map(String::as_str), Some("1"));
    }
}
