//! Wire bytes for representative messages. These pin field numbers and enum
//! values so agents built against `proto/agent.proto` keep interoperating.

use bytes::Bytes;
use prost::Message;
use shipyard_core::BuildStatus;
use shipyard_core::agent::{AgentEvent, ArtifactChunk, LogLevel, LogLine};
use shipyard_proto::ProtocolError;
use shipyard_proto::v1::{self, invocation_response::Response};

fn encode(event: AgentEvent) -> Vec<u8> {
    v1::InvocationResponse::from(event).encode_to_vec()
}

fn decode(bytes: &[u8]) -> Result<AgentEvent, ProtocolError> {
    let response = v1::InvocationResponse::decode(bytes).expect("valid protobuf");
    AgentEvent::try_from(response)
}

#[test]
fn test_state_running_bytes() {
    assert_eq!(encode(AgentEvent::State(BuildStatus::Running)), vec![0x08, 0x01]);
}

#[test]
fn test_state_enum_values_are_stable() {
    let expected = [
        (BuildStatus::Pending, 0),
        (BuildStatus::Running, 1),
        (BuildStatus::Finishing, 2),
        (BuildStatus::Succeeded, 3),
        (BuildStatus::Failed, 4),
        (BuildStatus::Broken, 5),
        (BuildStatus::Rejected, 6),
    ];
    for (status, value) in expected {
        assert_eq!(encode(AgentEvent::State(status)), vec![0x08, value]);
    }
}

#[test]
fn test_log_line_bytes() {
    let line = LogLine {
        message: "hi".to_string(),
        level: LogLevel::Warn,
        status: None,
        timestamp: None,
    };

    // field 2 (log), length 6: message "hi" (field 1), level WARN (field 2)
    assert_eq!(
        encode(AgentEvent::Log(line)),
        vec![0x12, 0x06, 0x0a, 0x02, b'h', b'i', 0x10, 0x02]
    );
}

#[test]
fn test_exit_status_log_bytes() {
    let bytes = encode(AgentEvent::Log(LogLine::exit_status(3)));
    // field 2 (log), length 4: level INFO, status 3
    assert_eq!(bytes, vec![0x12, 0x04, 0x10, 0x01, 0x18, 0x03]);

    match decode(&bytes).unwrap() {
        AgentEvent::Log(line) => assert_eq!(line.status, Some(3)),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_artifact_bytes() {
    let bytes = encode(AgentEvent::Artifact(ArtifactChunk {
        filename: "a".to_string(),
        chunk: Bytes::from_static(b"ab"),
    }));

    // field 3 (artifact), length 7: chunk "ab" (field 1), filename "a" (field 2)
    assert_eq!(
        bytes,
        vec![0x1a, 0x07, 0x0a, 0x02, b'a', b'b', 0x12, 0x01, b'a']
    );
}

#[test]
fn test_error_uses_field_four() {
    let response = v1::InvocationResponse {
        response: Some(Response::Error(v1::InvocationError {
            description: "x".to_string(),
            ..Default::default()
        })),
    };
    assert_eq!(response.encode_to_vec(), vec![0x22, 0x03, 0x0a, 0x01, b'x']);
}

#[test]
fn test_empty_message_is_rejected() {
    assert_eq!(decode(&[]), Err(ProtocolError::EmptyResponse));
}

#[test]
fn test_unknown_state_value_is_rejected() {
    assert_eq!(decode(&[0x08, 0x09]), Err(ProtocolError::UnknownState(9)));
}

#[test]
fn test_request_bytes() {
    let request = v1::InvocationRequest {
        command: Some(v1::Command {
            bin: "ls".to_string(),
            ..Default::default()
        }),
    };
    // field 1 (command), length 4: bin "ls"
    assert_eq!(request.encode_to_vec(), vec![0x0a, 0x04, 0x0a, 0x02, b'l', b's']);
}
