//! Crash recovery run once at startup.
//!
//! The task queue keeps nothing across restarts, so work that was queued or
//! in flight when the process died has to be re-derived:
//!
//! 1. every durable build still `pending` gets a runner again;
//! 2. every open pull request against a commit-trigger branch whose head
//!    has no commit status at all gets a runner, covering pull requests
//!    opened or updated while the server was down.
//!
//! Both steps go through [`BuildRunnerService`], so running the pass twice
//! never yields two runners for one commit. A provider or store failure
//! aborts the whole pass; it is retried on the next start, not in-process.

use serde::Serialize;
use shipyard_core::ProjectId;
use shipyard_core::project::ConfigService;
use shipyard_core::provider::ProviderClientFactory;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::runner::{RunnerFactory, RunnerParams};
use crate::service::{Admission, BuildRunnerService};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Pending builds given a runner again.
    pub resumed: usize,
    /// Unstatused pull request heads given a runner.
    pub reconciled: usize,
    /// Candidates already tracked by a runner.
    pub duplicates: usize,
    /// Projects no configured credential can serve.
    pub skipped_projects: Vec<ProjectId>,
}

pub struct ReconciliationOrchestrator {
    config: Arc<dyn ConfigService>,
    providers: Arc<dyn ProviderClientFactory>,
    factory: Arc<RunnerFactory>,
    runners: BuildRunnerService,
}

impl ReconciliationOrchestrator {
    pub fn new(
        config: Arc<dyn ConfigService>,
        providers: Arc<dyn ProviderClientFactory>,
        factory: Arc<RunnerFactory>,
        runners: BuildRunnerService,
    ) -> Self {
        Self {
            config,
            providers,
            factory,
            runners,
        }
    }

    pub async fn run(&self) -> SchedulerResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        self.resume_pending_builds(&mut report).await?;
        self.reconcile_open_pull_requests(&mut report).await?;

        info!(
            resumed = report.resumed,
            reconciled = report.reconciled,
            duplicates = report.duplicates,
            skipped = report.skipped_projects.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Step 1: give every pending build a runner.
    pub async fn resume_pending_builds(&self, report: &mut ReconcileReport) -> SchedulerResult<()> {
        for project in self.config.projects() {
            let Some(credential) = self.config.credential_for(&project) else {
                info!(
                    project = %project.id,
                    provider = %project.repo_config.provider,
                    "No credential serves this project, skipping"
                );
                report.skipped_projects.push(project.id.clone());
                continue;
            };

            let pending = self
                .factory
                .store()
                .pending_builds(&project.id)
                .await
                .map_err(SchedulerError::Store)?;
            if pending.is_empty() {
                continue;
            }

            let provider = self.providers.client_for(&credential);
            for build in pending {
                info!(project = %project.id, sha = %build.sha, build = build.number, "Resuming pending build");
                let runner = self.factory.setup(RunnerParams {
                    project: project.clone(),
                    sha: build.sha.clone(),
                    credential: credential.name().to_string(),
                    provider: provider.clone(),
                    trigger: build.trigger.clone(),
                    build: Some(build),
                    branch: None,
                });

                match self.runners.add_build_runner(runner).await? {
                    Admission::Accepted(_) => report.resumed += 1,
                    Admission::Duplicate(_) => report.duplicates += 1,
                }
            }
        }
        Ok(())
    }

    /// Step 2: give every unstatused open pull request head a runner.
    pub async fn reconcile_open_pull_requests(
        &self,
        report: &mut ReconcileReport,
    ) -> SchedulerResult<()> {
        for credential in self.config.provider_credentials() {
            let provider = self.providers.client_for(&credential);

            for project in self.config.projects_for(&credential) {
                let branches = project.commit_branches();
                if branches.is_empty() {
                    continue;
                }
                let repo = &project.repo_config.full_name;

                let heads = provider
                    .last_commit_sha_for_all_open_pull_requests(repo, &branches)
                    .await
                    .map_err(|e| SchedulerError::provider(&project.id, e))?;

                for sha in heads {
                    if self.runners.is_tracked(&project.id, &sha) {
                        report.duplicates += 1;
                        continue;
                    }

                    let statuses = provider
                        .statuses_for_commit_sha(repo, &sha)
                        .await
                        .map_err(|e| SchedulerError::provider(&project.id, e))?;
                    if !statuses.is_empty() {
                        continue;
                    }

                    warn!(project = %project.id, sha = %sha, "Open pull request was never built");
                    let runner = self.factory.setup(RunnerParams {
                        project: project.clone(),
                        sha: sha.clone(),
                        credential: credential.name().to_string(),
                        provider: provider.clone(),
                        build: None,
                        trigger: "pull_request".to_string(),
                        branch: None,
                    });

                    match self.runners.add_build_runner(runner).await? {
                        Admission::Accepted(_) => report.reconciled += 1,
                        Admission::Duplicate(_) => report.duplicates += 1,
                    }
                }
            }
        }
        Ok(())
    }
}
