//! Per-project worker loops.
//!
//! One loop per (project, credential). Each tick asks the provider which
//! commits are interesting (branch heads for commit triggers, open pull
//! request heads for pull request triggers) and hands the new ones to the
//! runner service. A failing or panicking iteration is logged and counted;
//! the loop carries on at its next tick and sibling loops never notice.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use shipyard_core::provider::{ProviderClient, ProviderClientFactory, ProviderCredential};
use shipyard_core::{CommitSha, Project, ProjectId};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult, panic_message};
use crate::runner::{RunnerFactory, RunnerParams};
use crate::service::{Admission, BuildRunnerService};

/// Point-in-time view of one worker loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub project: ProjectId,
    pub credential: String,
    pub running: bool,
    pub iterations: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_poll: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LoopStats {
    iterations: u64,
    failures: u64,
    last_error: Option<String>,
    last_poll: Option<DateTime<Utc>>,
}

struct WorkerSlot {
    project: Arc<Project>,
    credential: ProviderCredential,
    stats: Arc<Mutex<LoopStats>>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WorkerKey {
    project: ProjectId,
    credential: String,
}

struct Context {
    runners: BuildRunnerService,
    factory: Arc<RunnerFactory>,
    providers: Arc<dyn ProviderClientFactory>,
    poll_interval: Duration,
}

/// Owns the worker loops.
pub struct WorkerService {
    ctx: Arc<Context>,
    slots: Mutex<HashMap<WorkerKey, WorkerSlot>>,
}

impl WorkerService {
    pub fn new(
        runners: BuildRunnerService,
        factory: Arc<RunnerFactory>,
        providers: Arc<dyn ProviderClientFactory>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ctx: Arc::new(Context {
                runners,
                factory,
                providers,
                poll_interval,
            }),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Record a loop without starting it. Registering the same pair twice
    /// is a no-op.
    pub fn register(&self, project: Arc<Project>, credential: ProviderCredential) {
        let key = WorkerKey {
            project: project.id.clone(),
            credential: credential.name().to_string(),
        };
        self.lock().entry(key).or_insert_with(|| {
            debug!(project = %project.id, credential = %credential.name(), "Worker registered");
            WorkerSlot {
                project,
                credential,
                stats: Arc::new(Mutex::new(LoopStats::default())),
                running: None,
            }
        });
    }

    /// Spawn every registered loop that is not running yet. Returns how many
    /// were started.
    pub fn start_all(&self) -> usize {
        let mut slots = self.lock();
        let mut started = 0;
        for slot in slots.values_mut() {
            if slot.running.is_none() {
                slot.running = Some(self.spawn(slot));
                started += 1;
            }
        }
        info!(started, total = slots.len(), "Worker loops started");
        started
    }

    /// Register and spawn one loop.
    pub fn start(&self, project: Arc<Project>, credential: ProviderCredential) {
        let key = WorkerKey {
            project: project.id.clone(),
            credential: credential.name().to_string(),
        };
        self.register(project, credential);

        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(&key) {
            if slot.running.is_none() {
                slot.running = Some(self.spawn(slot));
            }
        }
    }

    /// Cancel and forget every loop for a project. In-flight runners are
    /// left alone.
    pub fn stop(&self, project_id: &ProjectId) -> usize {
        self.stop_where(|key| &key.project == project_id)
    }

    /// Cancel and forget every loop using a credential.
    pub fn stop_credential(&self, credential: &str) -> usize {
        self.stop_where(|key| key.credential == credential)
    }

    pub fn stop_all(&self) -> usize {
        self.stop_where(|_| true)
    }

    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        let slots = self.lock();
        let mut all: Vec<WorkerSnapshot> = slots
            .iter()
            .map(|(key, slot)| {
                let stats = lock_stats(&slot.stats);
                WorkerSnapshot {
                    project: key.project.clone(),
                    credential: key.credential.clone(),
                    running: slot
                        .running
                        .as_ref()
                        .is_some_and(|(_, handle)| !handle.is_finished()),
                    iterations: stats.iterations,
                    failures: stats.failures,
                    last_error: stats.last_error.clone(),
                    last_poll: stats.last_poll,
                }
            })
            .collect();
        all.sort_by(|a, b| (&a.project, &a.credential).cmp(&(&b.project, &b.credential)));
        all
    }

    fn stop_where(&self, matches: impl Fn(&WorkerKey) -> bool) -> usize {
        let mut slots = self.lock();
        let keys: Vec<WorkerKey> = slots.keys().filter(|k| matches(k)).cloned().collect();
        for key in &keys {
            if let Some(slot) = slots.remove(key) {
                if let Some((cancel, _)) = slot.running {
                    cancel.cancel();
                }
                info!(project = %key.project, credential = %key.credential, "Worker stopped");
            }
        }
        keys.len()
    }

    fn spawn(&self, slot: &WorkerSlot) -> (CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let provider = self.ctx.providers.client_for(&slot.credential);
        let handle = tokio::spawn(run_loop(
            self.ctx.clone(),
            slot.project.clone(),
            slot.credential.name().to_string(),
            provider,
            slot.stats.clone(),
            cancel.clone(),
        ));
        (cancel, handle)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerKey, WorkerSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_stats(stats: &Mutex<LoopStats>) -> MutexGuard<'_, LoopStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_loop(
    ctx: Arc<Context>,
    project: Arc<Project>,
    credential: String,
    provider: Arc<dyn ProviderClient>,
    stats: Arc<Mutex<LoopStats>>,
    cancel: CancellationToken,
) {
    info!(project = %project.id, credential = %credential, "Worker loop running");
    let mut ticker = tokio::time::interval(ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let iteration = AssertUnwindSafe(poll_once(&ctx, &project, &credential, &provider))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(SchedulerError::Panicked(panic_message(payload.as_ref())))
            });

        let mut recorded = lock_stats(&stats);
        recorded.iterations += 1;
        recorded.last_poll = Some(Utc::now());
        match iteration {
            Ok(admitted) => {
                debug!(project = %project.id, admitted, "Worker iteration done");
            }
            Err(e) => {
                warn!(project = %project.id, credential = %credential, error = %e, "Worker iteration failed");
                recorded.failures += 1;
                recorded.last_error = Some(e.to_string());
            }
        }
    }

    info!(project = %project.id, credential = %credential, "Worker loop stopped");
}

/// One pass over the provider. Returns how many runners were admitted.
async fn poll_once(
    ctx: &Context,
    project: &Arc<Project>,
    credential: &str,
    provider: &Arc<dyn ProviderClient>,
) -> SchedulerResult<usize> {
    let repo = &project.repo_config.full_name;
    let provider_err = |e| SchedulerError::provider(&project.id, e);

    // sha -> (trigger kind, branch)
    let mut candidates: BTreeMap<CommitSha, (&'static str, Option<String>)> = BTreeMap::new();
    for branch in project.commit_branches() {
        if let Some(sha) = provider
            .head_sha_for_branch(repo, &branch)
            .await
            .map_err(provider_err)?
        {
            candidates.entry(sha).or_insert(("commit", Some(branch)));
        }
    }

    let pr_branches = project.pull_request_branches();
    if !pr_branches.is_empty() {
        let heads = provider
            .last_commit_sha_for_all_open_pull_requests(repo, &pr_branches)
            .await
            .map_err(provider_err)?;
        for sha in heads {
            candidates.entry(sha).or_insert(("pull_request", None));
        }
    }

    let store = ctx.factory.store();
    let mut admitted = 0;
    for (sha, (trigger, branch)) in candidates {
        if ctx.runners.is_tracked(&project.id, &sha) {
            continue;
        }
        let known = store
            .builds_for_commit(&project.id, &sha)
            .await
            .map_err(SchedulerError::Store)?;
        if !known.is_empty() {
            continue;
        }

        let runner = ctx.factory.setup(RunnerParams {
            project: project.clone(),
            sha: sha.clone(),
            credential: credential.to_string(),
            provider: provider.clone(),
            build: None,
            trigger: trigger.to_string(),
            branch,
        });
        if let Admission::Accepted(build_id) = ctx.runners.add_build_runner(runner).await? {
            info!(project = %project.id, sha = %sha, trigger, build_id = %build_id, "New commit queued");
            admitted += 1;
        }
    }
    Ok(admitted)
}
