//! Projects under CI and the triggers that decide when they build.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::agent::Command;
use crate::provider::ProviderCredential;

/// Stable project identifier (the project's configured name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Git provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    Github,
    Gitlab,
    Bitbucket,
}

impl std::fmt::Display for GitProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitProvider::Github => write!(f, "github"),
            GitProvider::Gitlab => write!(f, "gitlab"),
            GitProvider::Bitbucket => write!(f, "bitbucket"),
        }
    }
}

impl std::str::FromStr for GitProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(GitProvider::Github),
            "gitlab" => Ok(GitProvider::Gitlab),
            "bitbucket" => Ok(GitProvider::Bitbucket),
            _ => Err(format!("Unknown git provider: {}", s)),
        }
    }
}

/// Repository a project builds from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Full repository name, e.g. `acme/app`.
    pub full_name: String,
    /// Provider whose credential is needed to talk to this repository.
    pub provider: GitProvider,
}

/// When a project should build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTrigger {
    /// Build new commits pushed to `branch`.
    Commit { branch: String },
    /// Build the head of every open pull request targeting `branch`.
    PullRequest { branch: String },
}

impl JobTrigger {
    pub fn branch(&self) -> &str {
        match self {
            JobTrigger::Commit { branch } | JobTrigger::PullRequest { branch } => branch,
        }
    }

    /// Trigger name recorded on builds started by this trigger.
    pub fn kind(&self) -> &'static str {
        match self {
            JobTrigger::Commit { .. } => "commit",
            JobTrigger::PullRequest { .. } => "pull_request",
        }
    }
}

/// A source-control repository under CI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub repo_config: RepoConfig,
    pub job_triggers: Vec<JobTrigger>,
    /// Command template sent to the agent; `${...}` variables are expanded per build.
    pub command: Command,
}

impl Project {
    /// Branches watched by commit triggers.
    pub fn commit_branches(&self) -> BTreeSet<String> {
        self.branches_where(|t| matches!(t, JobTrigger::Commit { .. }))
    }

    /// Branches whose pull requests should be built.
    pub fn pull_request_branches(&self) -> BTreeSet<String> {
        self.branches_where(|t| matches!(t, JobTrigger::PullRequest { .. }))
    }

    /// Whether `credential` can talk to this project's repository.
    pub fn serviceable_by(&self, credential: &ProviderCredential) -> bool {
        credential.provider() == self.repo_config.provider
    }

    fn branches_where(&self, keep: impl Fn(&JobTrigger) -> bool) -> BTreeSet<String> {
        self.job_triggers
            .iter()
            .filter(|t| keep(t))
            .map(|t| t.branch().to_string())
            .collect()
    }
}

/// Read-only source of projects and credentials.
pub trait ConfigService: Send + Sync {
    /// Every configured project.
    fn projects(&self) -> Vec<Arc<Project>>;

    /// Projects the given credential can serve.
    fn projects_for(&self, credential: &ProviderCredential) -> Vec<Arc<Project>> {
        self.projects()
            .into_iter()
            .filter(|p| p.serviceable_by(credential))
            .collect()
    }

    /// Every configured provider credential.
    fn provider_credentials(&self) -> Vec<ProviderCredential>;

    /// First credential able to serve `project`, if any.
    fn credential_for(&self, project: &Project) -> Option<ProviderCredential> {
        self.provider_credentials()
            .into_iter()
            .find(|c| project.serviceable_by(c))
    }
}
