//! Build records and the build status transition graph.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::project::ProjectId;
use crate::{Error, ResourceId, Result};

pub type BuildId = ResourceId;

/// A commit identifier, stored lowercase.
///
/// Providers hand out full 40 character SHAs; abbreviated SHAs are accepted
/// as long as they are non-empty hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(try_from = "String", into = "String")]
pub struct CommitSha(String);

impl CommitSha {
    pub fn parse(sha: &str) -> Result<Self> {
        let sha = sha.trim();
        if sha.is_empty() || sha.len() > 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput(format!("invalid commit sha: {:?}", sha)));
        }
        Ok(Self(sha.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 7 characters, as shown in provider UIs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(7)]
    }
}

impl std::str::FromStr for CommitSha {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CommitSha {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CommitSha> for String {
    fn from(sha: CommitSha) -> Self {
        sha.0
    }
}

/// Status of a build, which is also the state of the runner driving it.
///
/// ```text
/// PENDING -> RUNNING -> FINISHING -> SUCCEEDED
///    |          |           |
///    +----------+-----------+--> FAILED | BROKEN | REJECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Running,
    /// The command exited successfully; artifacts are still arriving.
    Finishing,
    Succeeded,
    /// A test failed or the command could not complete.
    Failed,
    /// Agent-side infrastructure failure.
    Broken,
    /// The agent refused the request.
    Rejected,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Broken | BuildStatus::Rejected
        )
    }

    /// Whether `next` is a legal step from `self`.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;

        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed | Broken | Rejected) => true,
            (Pending, Running) => true,
            (Running, Finishing | Succeeded) => true,
            (Finishing, Succeeded) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Finishing => "finishing",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Broken => "broken",
            BuildStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "running" => Ok(BuildStatus::Running),
            "finishing" => Ok(BuildStatus::Finishing),
            "succeeded" => Ok(BuildStatus::Succeeded),
            "failed" => Ok(BuildStatus::Failed),
            "broken" => Ok(BuildStatus::Broken),
            "rejected" => Ok(BuildStatus::Rejected),
            other => Err(Error::InvalidInput(format!("unknown build status: {}", other))),
        }
    }
}

/// A durable record of one build attempt for a (project, commit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub project_id: ProjectId,
    pub sha: CommitSha,
    /// Per-project sequence number, starting at 1.
    pub number: i64,
    pub status: BuildStatus,
    /// What caused the build (`commit`, `pull_request`, ...).
    pub trigger: String,
    pub description: Option<String>,
    pub exit_status: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A status change written by the runner that owns a build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildUpdate {
    pub status: BuildStatus,
    pub description: Option<String>,
    pub exit_status: Option<i32>,
}

impl BuildUpdate {
    pub fn status(status: BuildStatus) -> Self {
        Self {
            status,
            description: None,
            exit_status: None,
        }
    }
}

impl Build {
    /// Where logs and artifacts for this build live.
    pub fn location(&self) -> String {
        format!("projects/{}/builds/{}", self.project_id, self.number)
    }

    /// Apply a status update, refusing to leave a terminal status.
    pub fn apply(&mut self, update: &BuildUpdate, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "build {} is already {}",
                self.id, self.status
            )));
        }

        if update.status == BuildStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if update.status.is_terminal() {
            self.finished_at = Some(now);
        }

        self.status = update.status;
        if update.description.is_some() {
            self.description = update.description.clone();
        }
        if update.exit_status.is_some() {
            self.exit_status = update.exit_status;
        }
        Ok(())
    }
}
