//! In-memory build store.
//!
//! Used when no database URL is configured and throughout the scheduler
//! tests. Nothing survives a restart.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use shipyard_core::agent::LogLine;
use shipyard_core::build::BuildUpdate;
use shipyard_core::store::{ArtifactInfo, BuildStore};
use shipyard_core::{Build, BuildId, BuildStatus, CommitSha, Error, ProjectId, Result};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    builds: HashMap<BuildId, Build>,
    logs: HashMap<BuildId, Vec<LogLine>>,
    // Insertion order is kept so listings match the order artifacts completed.
    artifacts: HashMap<BuildId, Vec<(String, Bytes)>>,
}

#[derive(Default)]
pub struct MemoryBuildStore {
    inner: Mutex<Inner>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a build record directly, bypassing numbering.
    pub fn insert_build(&self, build: Build) {
        self.lock().builds.insert(build.id, build);
    }

    /// Stored bytes for one artifact.
    pub fn artifact_data(&self, id: BuildId, filename: &str) -> Option<Bytes> {
        self.lock()
            .artifacts
            .get(&id)?
            .iter()
            .find(|(name, _)| name == filename)
            .map(|(_, data)| data.clone())
    }

    /// Every build, in creation order.
    pub fn all_builds(&self) -> Vec<Build> {
        let mut builds: Vec<Build> = self.lock().builds.values().cloned().collect();
        builds.sort_by_key(|b| (b.created_at, b.id));
        builds
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn require(inner: &Inner, id: BuildId) -> Result<()> {
        if inner.builds.contains_key(&id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("build {}", id)))
        }
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn create_build(
        &self,
        project_id: &ProjectId,
        sha: &CommitSha,
        trigger: &str,
    ) -> Result<Build> {
        let mut inner = self.lock();
        let number = inner
            .builds
            .values()
            .filter(|b| &b.project_id == project_id)
            .map(|b| b.number)
            .max()
            .unwrap_or(0)
            + 1;

        let build = Build {
            id: BuildId::new(),
            project_id: project_id.clone(),
            sha: sha.clone(),
            number,
            status: BuildStatus::Pending,
            trigger: trigger.to_string(),
            description: None,
            exit_status: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        inner.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn get_build(&self, id: BuildId) -> Result<Build> {
        self.lock()
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("build {}", id)))
    }

    async fn pending_builds(&self, project_id: &ProjectId) -> Result<Vec<Build>> {
        let mut builds: Vec<Build> = self
            .lock()
            .builds
            .values()
            .filter(|b| &b.project_id == project_id && b.status == BuildStatus::Pending)
            .cloned()
            .collect();
        builds.sort_by_key(|b| b.number);
        Ok(builds)
    }

    async fn builds_for_commit(&self, project_id: &ProjectId, sha: &CommitSha) -> Result<Vec<Build>> {
        let mut builds: Vec<Build> = self
            .lock()
            .builds
            .values()
            .filter(|b| &b.project_id == project_id && &b.sha == sha)
            .cloned()
            .collect();
        builds.sort_by_key(|b| std::cmp::Reverse(b.number));
        Ok(builds)
    }

    async fn update_status(&self, id: BuildId, update: BuildUpdate) -> Result<Build> {
        let mut inner = self.lock();
        let build = inner
            .builds
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("build {}", id)))?;
        build.apply(&update, Utc::now())?;
        Ok(build.clone())
    }

    async fn append_logs(&self, id: BuildId, lines: &[LogLine]) -> Result<()> {
        let mut inner = self.lock();
        Self::require(&inner, id)?;
        inner.logs.entry(id).or_default().extend_from_slice(lines);
        Ok(())
    }

    async fn logs(&self, id: BuildId) -> Result<Vec<LogLine>> {
        let inner = self.lock();
        Self::require(&inner, id)?;
        Ok(inner.logs.get(&id).cloned().unwrap_or_default())
    }

    async fn put_artifact(&self, id: BuildId, filename: &str, data: Bytes) -> Result<ArtifactInfo> {
        let mut inner = self.lock();
        Self::require(&inner, id)?;

        let info = ArtifactInfo {
            filename: filename.to_string(),
            size: data.len() as u64,
        };
        let entries = inner.artifacts.entry(id).or_default();
        match entries.iter().position(|(name, _)| name == filename) {
            Some(i) => entries[i].1 = data,
            None => entries.push((filename.to_string(), data)),
        }
        Ok(info)
    }

    async fn artifacts(&self, id: BuildId) -> Result<Vec<ArtifactInfo>> {
        let inner = self.lock();
        Self::require(&inner, id)?;
        Ok(inner
            .artifacts
            .get(&id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(filename, data)| ArtifactInfo {
                        filename: filename.clone(),
                        size: data.len() as u64,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
