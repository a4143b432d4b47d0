//! Source-control provider capability interface.
//!
//! The orchestration engine only needs a handful of provider operations;
//! any provider implementing [`ProviderClient`] can be substituted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::project::GitProvider;
use crate::{CommitSha, Result};

/// Access token for GitHub, bound to one CI operator identity.
#[derive(Clone, PartialEq, Eq)]
pub struct GitHubCredential {
    /// Configured credential name (e.g. the bot account).
    pub name: String,
    pub token: String,
}

impl std::fmt::Debug for GitHubCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubCredential")
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// A credential for a supported provider.
///
/// Only providers with a client implementation get a variant, so a
/// credential for an unsupported provider cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCredential {
    Github(GitHubCredential),
}

impl ProviderCredential {
    pub fn provider(&self) -> GitProvider {
        match self {
            ProviderCredential::Github(_) => GitProvider::Github,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProviderCredential::Github(c) => &c.name,
        }
    }
}

/// State of a commit status as reported to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatusState {
    Pending,
    Success,
    Failure,
    Error,
}

/// A status attached to a commit on the provider side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub state: CommitStatusState,
    pub context: String,
    pub description: Option<String>,
    pub target_url: Option<String>,
}

/// Operations the engine consumes from a source-control provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Head SHA of every open pull request whose base branch is in `branches`.
    async fn last_commit_sha_for_all_open_pull_requests(
        &self,
        repo_full_name: &str,
        branches: &BTreeSet<String>,
    ) -> Result<BTreeSet<CommitSha>>;

    /// Statuses recorded for a commit, newest first. Empty means unstatused.
    async fn statuses_for_commit_sha(
        &self,
        repo_full_name: &str,
        sha: &CommitSha,
    ) -> Result<Vec<CommitStatus>>;

    /// Current head of `branch`, if the branch exists.
    async fn head_sha_for_branch(
        &self,
        repo_full_name: &str,
        branch: &str,
    ) -> Result<Option<CommitSha>>;

    /// Attach a status to a commit.
    async fn set_commit_status(
        &self,
        repo_full_name: &str,
        sha: &CommitSha,
        status: &CommitStatus,
    ) -> Result<()>;
}

/// Builds provider clients for credentials.
pub trait ProviderClientFactory: Send + Sync {
    fn client_for(&self, credential: &ProviderCredential) -> Arc<dyn ProviderClient>;
}
