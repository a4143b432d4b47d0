//! Remote agent reached over the `RunFastlane` streaming RPC.

use async_trait::async_trait;
use futures::StreamExt;
use shipyard_core::agent::{Agent, AgentEvent, AgentStream, Command};
use shipyard_core::{Error, Result};
use shipyard_proto::v1::InvocationRequest;
use shipyard_proto::{AgentClient, ProtocolError};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Agent backed by a remote gRPC service.
///
/// The channel connects lazily on the first invocation and is shared by
/// every runner; tonic multiplexes the streams over one connection.
pub struct GrpcAgent {
    endpoint: String,
    channel: Channel,
}

impl GrpcAgent {
    /// Must be called from within a tokio runtime.
    pub fn new(endpoint: &str, connect_timeout: Duration) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| Error::InvalidInput(format!("invalid agent endpoint {}: {}", endpoint, e)))?
            .connect_timeout(connect_timeout)
            .connect_lazy();

        Ok(Self {
            endpoint: endpoint.to_string(),
            channel,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Agent for GrpcAgent {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn invoke(&self, command: Command) -> Result<AgentStream> {
        let mut client = AgentClient::new(self.channel.clone());
        let request = InvocationRequest::from(&command);

        debug!(endpoint = %self.endpoint, bin = %command.bin, "Invoking remote agent");
        let response = client
            .run_fastlane(request)
            .await
            .map_err(|status| Error::from(ProtocolError::from(status)))?;

        let events = response.into_inner().map(|item| match item {
            Ok(message) => AgentEvent::try_from(message).map_err(Error::from),
            Err(status) => Err(ProtocolError::from(status).into()),
        });

        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_endpoint_is_rejected() {
        let result = GrpcAgent::new("not a uri", Duration::from_secs(1));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_unreachable_agent_fails_invocation() {
        let agent = GrpcAgent::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        assert_eq!(agent.name(), "grpc");

        let result = agent.invoke(Command::new("fastlane")).await;
        assert!(matches!(result, Err(Error::Agent(_))));
    }
}
