//! Version 1 of the agent protocol.

use std::collections::BTreeMap;

/// Command to execute on the agent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(string, tag = "1")]
    pub bin: String,
    #[prost(string, repeated, tag = "2")]
    pub parameters: Vec<String>,
    #[prost(btree_map = "string, string", tag = "3")]
    pub env: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvocationRequest {
    #[prost(message, optional, tag = "1")]
    pub command: Option<Command>,
}

/// Invocation state as sent by the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum State {
    Pending = 0,
    Running = 1,
    Finishing = 2,
    Succeeded = 3,
    Failed = 4,
    Broken = 5,
    Rejected = 6,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Log {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(enumeration = "log::Level", tag = "2")]
    pub level: i32,
    #[prost(int32, tag = "3")]
    pub status: i32,
    #[prost(uint64, tag = "4")]
    pub timestamp: u64,
}

pub mod log {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Level {
        Debug = 0,
        Info = 1,
        Warn = 2,
        Error = 3,
        Fatal = 4,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Artifact {
    #[prost(bytes = "bytes", tag = "1")]
    pub chunk: ::bytes::Bytes,
    #[prost(string, tag = "2")]
    pub filename: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvocationError {
    #[prost(string, tag = "1")]
    pub description: String,
    #[prost(string, tag = "2")]
    pub file: String,
    #[prost(uint32, tag = "3")]
    pub line_number: u32,
    #[prost(string, tag = "4")]
    pub stacktrace: String,
    #[prost(int32, tag = "5")]
    pub exit_status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InvocationResponse {
    #[prost(oneof = "invocation_response::Response", tags = "1, 2, 3, 4")]
    pub response: Option<invocation_response::Response>,
}

pub mod invocation_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(enumeration = "super::State", tag = "1")]
        State(i32),
        #[prost(message, tag = "2")]
        Log(super::Log),
        #[prost(message, tag = "3")]
        Artifact(super::Artifact),
        #[prost(message, tag = "4")]
        Error(super::InvocationError),
    }
}
