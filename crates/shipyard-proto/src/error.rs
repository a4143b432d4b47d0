//! Wire decoding errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invocation response carries no payload")]
    EmptyResponse,

    #[error("unknown invocation state: {0}")]
    UnknownState(i32),

    #[error("unknown log level: {0}")]
    UnknownLogLevel(i32),

    #[error("artifact chunk without filename")]
    MissingFilename,

    #[error("stream failed: {0}")]
    Transport(String),
}

impl From<ProtocolError> for shipyard_core::Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Transport(msg) => shipyard_core::Error::Agent(msg),
            other => shipyard_core::Error::Protocol(other.to_string()),
        }
    }
}

impl From<tonic::Status> for ProtocolError {
    fn from(status: tonic::Status) -> Self {
        ProtocolError::Transport(format!("{}: {}", status.code(), status.message()))
    }
}
