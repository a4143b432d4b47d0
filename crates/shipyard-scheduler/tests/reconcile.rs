//! Startup reconciliation against fake providers.

mod common;

use common::*;
use shipyard_config::StaticConfigService;
use shipyard_core::project::GitProvider;
use shipyard_core::store::BuildStore;
use shipyard_core::{BuildStatus, ProjectId};
use shipyard_scheduler::{ReconcileReport, ReconciliationOrchestrator, SchedulerError};
use std::sync::Arc;
use tokio::sync::Semaphore;

fn orchestrator(
    harness: &Harness,
    config: StaticConfigService,
    providers: FakeProviders,
) -> ReconciliationOrchestrator {
    ReconciliationOrchestrator::new(
        Arc::new(config),
        Arc::new(providers),
        harness.factory.clone(),
        harness.runners.clone(),
    )
}

#[tokio::test]
async fn test_unstatused_pull_request_gets_a_runner() {
    let harness = Harness::new(ScriptedAgent::succeeding());
    let provider = Arc::new(
        FakeProvider::default()
            .with_open_pr("main", "abc123")
            .with_open_pr("main", "def456")
            .with_status("def456"),
    );
    let config = StaticConfigService::new(
        vec![project("app", "acme/app", vec![commit_trigger("main")])],
        vec![credential("ci-bot")],
    );

    let report = orchestrator(&harness, config, FakeProviders::default().with("ci-bot", provider))
        .run()
        .await
        .unwrap();
    harness.runners.wait_idle().await;

    assert_eq!(report.reconciled, 1);
    assert_eq!(report.resumed, 0);

    let builds = harness.store.all_builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].sha, sha("abc123"));
    assert_eq!(builds[0].trigger, "pull_request");
    assert_eq!(builds[0].status, BuildStatus::Succeeded);
    assert_eq!(harness.agent.invocations().len(), 1);
}

#[tokio::test]
async fn test_only_commit_trigger_branches_are_reconciled() {
    let harness = Harness::new(ScriptedAgent::succeeding());
    let provider = Arc::new(
        FakeProvider::default()
            .with_open_pr("main", "abc123")
            .with_open_pr("develop", "def456"),
    );
    let config = StaticConfigService::new(
        vec![project(
            "app",
            "acme/app",
            vec![commit_trigger("main"), pr_trigger("develop")],
        )],
        vec![credential("ci-bot")],
    );

    let report = orchestrator(&harness, config, FakeProviders::default().with("ci-bot", provider))
        .run()
        .await
        .unwrap();
    harness.runners.wait_idle().await;

    assert_eq!(report.reconciled, 1);
    let builds = harness.store.all_builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].sha, sha("abc123"));
}

#[tokio::test]
async fn test_resuming_pending_builds_is_idempotent() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(ScriptedAgent::succeeding().gated(gate.clone()));
    let app = ProjectId::new("app");
    for head in ["abc123", "def456"] {
        harness
            .store
            .create_build(&app, &sha(head), "commit")
            .await
            .unwrap();
    }
    let config = StaticConfigService::new(
        vec![project("app", "acme/app", vec![commit_trigger("main")])],
        vec![credential("ci-bot")],
    );
    let reconciler = orchestrator(&harness, config, FakeProviders::default());

    let mut first = ReconcileReport::default();
    reconciler.resume_pending_builds(&mut first).await.unwrap();
    let mut second = ReconcileReport::default();
    reconciler.resume_pending_builds(&mut second).await.unwrap();

    assert_eq!(first.resumed, 2);
    assert_eq!(second.resumed, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(harness.runners.active_count(), 2);

    gate.add_permits(2);
    harness.runners.wait_idle().await;
    assert_eq!(harness.agent.invocations().len(), 2);
    assert_eq!(harness.store.all_builds().len(), 2);
    assert!(
        harness
            .store
            .all_builds()
            .iter()
            .all(|b| b.status == BuildStatus::Succeeded)
    );
}

#[tokio::test]
async fn test_resumed_commit_is_not_reconciled_twice() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(ScriptedAgent::succeeding().gated(gate.clone()));
    let pending = harness
        .store
        .create_build(&ProjectId::new("app"), &sha("abc123"), "pull_request")
        .await
        .unwrap();
    let provider = Arc::new(FakeProvider::default().with_open_pr("main", "abc123"));
    let config = StaticConfigService::new(
        vec![project("app", "acme/app", vec![commit_trigger("main")])],
        vec![credential("ci-bot")],
    );

    let report = orchestrator(&harness, config, FakeProviders::default().with("ci-bot", provider))
        .run()
        .await
        .unwrap();

    assert_eq!(report.resumed, 1);
    assert_eq!(report.reconciled, 0);
    assert_eq!(report.duplicates, 1);

    gate.add_permits(1);
    harness.runners.wait_idle().await;
    let builds = harness.store.all_builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].id, pending.id);
}

#[tokio::test]
async fn test_projects_without_a_credential_are_skipped() {
    let harness = Harness::new(ScriptedAgent::succeeding());
    harness
        .store
        .create_build(&ProjectId::new("mirror"), &sha("abc123"), "commit")
        .await
        .unwrap();
    let config = StaticConfigService::new(
        vec![
            project("app", "acme/app", vec![commit_trigger("main")]),
            project_on(
                "mirror",
                "acme/mirror",
                GitProvider::Gitlab,
                vec![commit_trigger("main")],
            ),
        ],
        vec![credential("ci-bot")],
    );

    let report = orchestrator(&harness, config, FakeProviders::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.skipped_projects, vec![ProjectId::new("mirror")]);
    assert_eq!(report.resumed, 0);
    assert_eq!(harness.runners.active_count(), 0);
}

#[tokio::test]
async fn test_provider_failure_fails_the_pass() {
    let harness = Harness::new(ScriptedAgent::succeeding());
    let provider = Arc::new(FakeProvider::default().with_open_pr("main", "abc123").failing());
    let config = StaticConfigService::new(
        vec![project("app", "acme/app", vec![commit_trigger("main")])],
        vec![credential("ci-bot")],
    );

    let result = orchestrator(&harness, config, FakeProviders::default().with("ci-bot", provider))
        .run()
        .await;

    assert!(matches!(result, Err(SchedulerError::Provider { .. })));
    assert_eq!(harness.runners.active_count(), 0);
}
