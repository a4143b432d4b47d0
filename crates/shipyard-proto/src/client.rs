//! gRPC client stub for the agent's `RunFastlane` call.

use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

use crate::v1::{InvocationRequest, InvocationResponse};

/// Fully qualified path of the streaming RPC.
pub const RUN_FASTLANE_PATH: &str = "/shipyard.agent.v1.Agent/RunFastlane";

/// Client for a remote execution agent.
#[derive(Debug, Clone)]
pub struct AgentClient {
    inner: tonic::client::Grpc<Channel>,
}

impl AgentClient {
    /// Connect eagerly to an agent endpoint.
    pub async fn connect(endpoint: Endpoint) -> Result<Self, tonic::transport::Error> {
        let channel = endpoint.connect().await?;
        Ok(Self::new(channel))
    }

    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Send one invocation request and receive the agent's response stream.
    pub async fn run_fastlane(
        &mut self,
        request: InvocationRequest,
    ) -> Result<tonic::Response<tonic::Streaming<InvocationResponse>>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("agent not ready: {}", e)))?;

        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(RUN_FASTLANE_PATH);
        self.inner
            .server_streaming(tonic::Request::new(request), path, codec)
            .await
    }
}
