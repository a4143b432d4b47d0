//! Admission control for build runners.
//!
//! The registry is the one piece of shared mutable state in the engine.
//! The duplicate check and the reservation happen under one lock, so at
//! most one runner per (project, commit) is ever registered. The entry is
//! released by a guard owned by the runner task, which also covers panics.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use shipyard_core::store::BuildStore;
use shipyard_core::{BuildId, BuildStatus, CommitSha, ProjectId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::TaskQueue;
use crate::runner::BuildRunner;

/// Identity used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunnerKey {
    pub project_id: ProjectId,
    pub sha: CommitSha,
}

impl RunnerKey {
    pub fn new(project_id: ProjectId, sha: CommitSha) -> Self {
        Self { project_id, sha }
    }
}

/// Result of [`BuildRunnerService::add_build_runner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The runner was registered and queued for its build.
    Accepted(BuildId),
    /// A runner for the same commit is already tracked; the new one was
    /// dropped. Carries the tracked runner's build once it has one.
    Duplicate(Option<BuildId>),
}

/// Point-in-time view of a tracked runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerSnapshot {
    pub project_id: ProjectId,
    pub sha: CommitSha,
    pub build_id: Option<BuildId>,
    pub build_number: Option<i64>,
    pub status: BuildStatus,
    pub trigger: String,
    pub credential: String,
    pub registered_at: DateTime<Utc>,
}

struct RunnerEntry {
    build_id: Option<BuildId>,
    build_number: Option<i64>,
    trigger: String,
    credential: String,
    status: watch::Receiver<BuildStatus>,
    cancel: CancellationToken,
    registered_at: DateTime<Utc>,
}

struct Registry {
    runners: Mutex<HashMap<RunnerKey, RunnerEntry>>,
    idle: Notify,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<RunnerKey, RunnerEntry>> {
        self.runners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a registry entry when dropped.
struct Registration {
    registry: Arc<Registry>,
    key: RunnerKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut runners = self.registry.lock();
        runners.remove(&self.key);
        let idle = runners.is_empty();
        drop(runners);

        debug!(project = %self.key.project_id, sha = %self.key.sha, "Runner released");
        if idle {
            self.registry.idle.notify_waiters();
        }
    }
}

/// Tracks every active or queued build runner.
#[derive(Clone)]
pub struct BuildRunnerService {
    registry: Arc<Registry>,
    queue: TaskQueue,
    store: Arc<dyn BuildStore>,
}

impl BuildRunnerService {
    pub fn new(queue: TaskQueue, store: Arc<dyn BuildStore>) -> Self {
        Self {
            registry: Arc::new(Registry {
                runners: Mutex::new(HashMap::new()),
                idle: Notify::new(),
            }),
            queue,
            store,
        }
    }

    /// Register a runner and queue it, unless one for the same commit is
    /// already tracked.
    pub async fn add_build_runner(&self, mut runner: BuildRunner) -> SchedulerResult<Admission> {
        let key = runner.key();

        let registration = {
            let mut runners = self.registry.lock();
            if let Some(existing) = runners.get(&key) {
                info!(
                    project = %key.project_id,
                    sha = %key.sha,
                    status = %*existing.status.borrow(),
                    "Runner already tracked, skipping duplicate"
                );
                return Ok(Admission::Duplicate(existing.build_id));
            }

            runners.insert(
                key.clone(),
                RunnerEntry {
                    build_id: runner.build().map(|b| b.id),
                    build_number: runner.build().map(|b| b.number),
                    trigger: runner.trigger().to_string(),
                    credential: runner.credential().to_string(),
                    status: runner.subscribe(),
                    cancel: runner.cancellation_token(),
                    registered_at: Utc::now(),
                },
            );
            Registration {
                registry: self.registry.clone(),
                key: key.clone(),
            }
        };

        let build = match runner.build() {
            Some(build) => build.clone(),
            None => {
                // Dropping the registration on error releases the reservation.
                let build = self
                    .store
                    .create_build(&key.project_id, &key.sha, runner.trigger())
                    .await
                    .map_err(SchedulerError::Store)?;

                if let Some(entry) = self.registry.lock().get_mut(&key) {
                    entry.build_id = Some(build.id);
                    entry.build_number = Some(build.number);
                }
                runner.attach_build(build.clone());
                build
            }
        };

        let task = async move {
            let _registration = registration;
            let outcome = runner.run().await?;
            debug!(
                build_id = %outcome.build.id,
                status = %outcome.build.status,
                logs = outcome.output.logs.len(),
                "Runner task done"
            );
            Ok::<(), shipyard_core::Error>(())
        }
        .boxed();

        self.queue
            .enqueue(format!("build {} #{}", key.project_id, build.number), task)?;

        info!(
            project = %key.project_id,
            sha = %key.sha,
            build = build.number,
            trigger = %build.trigger,
            "Runner admitted"
        );
        Ok(Admission::Accepted(build.id))
    }

    /// Runners currently tracked, queued or executing.
    pub fn active_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Runners waiting for a free queue slot.
    pub fn queued_count(&self) -> usize {
        self.queue.queued()
    }

    pub fn is_tracked(&self, project_id: &ProjectId, sha: &CommitSha) -> bool {
        self.registry
            .lock()
            .contains_key(&RunnerKey::new(project_id.clone(), sha.clone()))
    }

    pub fn lookup(&self, project_id: &ProjectId, sha: &CommitSha) -> Option<RunnerSnapshot> {
        let key = RunnerKey::new(project_id.clone(), sha.clone());
        self.registry.lock().get(&key).map(|e| snapshot(&key, e))
    }

    /// Every tracked runner, oldest registration first.
    pub fn snapshots(&self) -> Vec<RunnerSnapshot> {
        let mut all: Vec<RunnerSnapshot> = self
            .registry
            .lock()
            .iter()
            .map(|(key, entry)| snapshot(key, entry))
            .collect();
        all.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.project_id.cmp(&b.project_id))
                .then_with(|| a.sha.cmp(&b.sha))
        });
        all
    }

    /// Abort a tracked runner. Returns whether one was found.
    pub fn abort(&self, project_id: &ProjectId, sha: &CommitSha) -> bool {
        let key = RunnerKey::new(project_id.clone(), sha.clone());
        match self.registry.lock().get(&key) {
            Some(entry) => {
                warn!(project = %project_id, sha = %sha, "Aborting runner");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Resolve once no runner is tracked.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.registry.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn snapshot(key: &RunnerKey, entry: &RunnerEntry) -> RunnerSnapshot {
    RunnerSnapshot {
        project_id: key.project_id.clone(),
        sha: key.sha.clone(),
        build_id: entry.build_id,
        build_number: entry.build_number,
        status: *entry.status.borrow(),
        trigger: entry.trigger.clone(),
        credential: entry.credential.clone(),
        registered_at: entry.registered_at,
    }
}
