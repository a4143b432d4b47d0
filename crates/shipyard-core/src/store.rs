//! Durable build storage abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::agent::LogLine;
use crate::build::BuildUpdate;
use crate::project::ProjectId;
use crate::{Build, BuildId, CommitSha, Result};

/// Metadata about a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub filename: String,
    pub size: u64,
}

/// Append-only store of build records, logs and artifacts.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Record a new `pending` build and assign it the next per-project number.
    async fn create_build(
        &self,
        project_id: &ProjectId,
        sha: &CommitSha,
        trigger: &str,
    ) -> Result<Build>;

    async fn get_build(&self, id: BuildId) -> Result<Build>;

    /// Builds still marked `pending`, oldest first.
    async fn pending_builds(&self, project_id: &ProjectId) -> Result<Vec<Build>>;

    /// Every build recorded for a commit, newest first.
    async fn builds_for_commit(&self, project_id: &ProjectId, sha: &CommitSha)
    -> Result<Vec<Build>>;

    /// Persist a status change. Fails with `Error::Conflict` if the build is
    /// already terminal.
    async fn update_status(&self, id: BuildId, update: BuildUpdate) -> Result<Build>;

    async fn append_logs(&self, id: BuildId, lines: &[LogLine]) -> Result<()>;

    async fn logs(&self, id: BuildId) -> Result<Vec<LogLine>>;

    /// Store an artifact, replacing any previous content under the same name.
    async fn put_artifact(&self, id: BuildId, filename: &str, data: Bytes) -> Result<ArtifactInfo>;

    async fn artifacts(&self, id: BuildId) -> Result<Vec<ArtifactInfo>>;
}
