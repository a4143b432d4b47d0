//! Wiring of the orchestration engine and the launch sequence steps.

use shipyard_config::{AgentConfig, ServerConfig, StaticConfigService};
use shipyard_core::agent::Agent;
use shipyard_core::project::ConfigService;
use shipyard_core::provider::ProviderClientFactory;
use shipyard_core::store::BuildStore;
use shipyard_executor::{GrpcAgent, LocalAgent};
use shipyard_scheduler::{
    BuildRunnerService, ReconcileReport, ReconciliationOrchestrator, RunnerFactory, TaskQueue,
    WorkerService,
};
use std::sync::Arc;
use tracing::{error, info};

/// Build the configured agent backend.
pub fn build_agent(config: &AgentConfig) -> shipyard_core::Result<Arc<dyn Agent>> {
    match config {
        AgentConfig::Grpc {
            endpoint,
            connect_timeout,
        } => {
            info!(endpoint = %endpoint, "Using gRPC agent");
            Ok(Arc::new(GrpcAgent::new(endpoint, *connect_timeout)?))
        }
        AgentConfig::Local {
            working_dir,
            artifact_dir,
        } => {
            info!(working_dir = ?working_dir, "Using local process agent");
            Ok(Arc::new(LocalAgent::new(
                working_dir.clone(),
                artifact_dir.clone(),
            )))
        }
    }
}

/// The running engine: runner registry, worker loops and their
/// collaborators.
pub struct Engine {
    pub config: Arc<dyn ConfigService>,
    pub store: Arc<dyn BuildStore>,
    pub providers: Arc<dyn ProviderClientFactory>,
    pub factory: Arc<RunnerFactory>,
    pub runners: BuildRunnerService,
    pub workers: Arc<WorkerService>,
}

impl Engine {
    pub fn new(
        server: &ServerConfig,
        config: StaticConfigService,
        store: Arc<dyn BuildStore>,
        agent: Arc<dyn Agent>,
        providers: Arc<dyn ProviderClientFactory>,
    ) -> Self {
        let settings = &server.scheduler;
        let factory =
            Arc::new(RunnerFactory::new(agent, store.clone(), settings).with_process_env());
        let runners = BuildRunnerService::new(TaskQueue::new(settings.concurrency), store.clone());
        let workers = Arc::new(WorkerService::new(
            runners.clone(),
            factory.clone(),
            providers.clone(),
            settings.poll_interval,
        ));

        Self {
            config: Arc::new(config),
            store,
            providers,
            factory,
            runners,
            workers,
        }
    }

    /// Register one worker loop per (credential, project) pair the
    /// credential can serve. Returns how many pairs were registered.
    pub fn register_workers(&self) -> usize {
        let mut registered = 0;
        for credential in self.config.provider_credentials() {
            for project in self.config.projects_for(&credential) {
                self.workers.register(project, credential.clone());
                registered += 1;
            }
        }

        for project in self.config.projects() {
            if self.config.credential_for(&project).is_none() {
                info!(
                    project = %project.id,
                    provider = %project.repo_config.provider,
                    "No credential serves this project, no worker registered"
                );
            }
        }
        registered
    }

    /// Run the crash recovery pass. A failure is logged and the pass is
    /// abandoned; it is not retried until the next start.
    pub async fn reconcile(&self) -> Option<ReconcileReport> {
        let orchestrator = ReconciliationOrchestrator::new(
            self.config.clone(),
            self.providers.clone(),
            self.factory.clone(),
            self.runners.clone(),
        );

        match orchestrator.run().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Reconciliation failed, abandoning pass");
                None
            }
        }
    }

    pub fn start_workers(&self) -> usize {
        self.workers.start_all()
    }

    /// Stop every worker loop. Runners already admitted keep going.
    pub fn shutdown(&self) {
        let stopped = self.workers.stop_all();
        info!(
            stopped,
            in_flight = self.runners.active_count(),
            "Worker loops stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::GitHubProviders;
    use shipyard_config::parse_server_config;
    use shipyard_db::MemoryBuildStore;

    const CONFIG: &str = r#"
        scheduler concurrency=2 poll-interval-secs=5
        agent "local"
        credential "ci-bot" provider="github" token-env="GITHUB_TOKEN"
        project "app" {
            repo "acme/app" provider="github"
            trigger "commit" branch="main"
            command "make" { arg "test"; }
        }
        project "site" {
            repo "acme/site"
            trigger "pull_request" branch="main"
            command "make"
        }
        project "mirror" {
            repo "acme/mirror" provider="gitlab"
            trigger "commit" branch="main"
            command "make"
        }
    "#;

    fn engine() -> Engine {
        let server = parse_server_config(CONFIG).unwrap();
        let config =
            StaticConfigService::from_config(&server, |_| Some("token".to_string())).unwrap();
        let agent = build_agent(&server.agent).unwrap();

        Engine::new(
            &server,
            config,
            Arc::new(MemoryBuildStore::new()),
            agent,
            Arc::new(GitHubProviders::new("http://127.0.0.1:1")),
        )
    }

    #[tokio::test]
    async fn test_workers_registered_for_serviceable_projects() {
        let engine = engine();

        assert_eq!(engine.register_workers(), 2);
        let workers = engine.workers.workers();
        let projects: Vec<&str> = workers.iter().map(|w| w.project.as_str()).collect();
        assert_eq!(projects, vec!["app", "site"]);
        assert!(workers.iter().all(|w| !w.running && w.credential == "ci-bot"));
    }

    #[tokio::test]
    async fn test_reconciliation_failure_is_not_fatal() {
        let engine = engine();

        // The provider is unreachable, so the pass fails and is dropped.
        assert_eq!(engine.reconcile().await, None);
        assert_eq!(engine.runners.active_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_started_loops() {
        let engine = engine();
        engine.register_workers();

        assert_eq!(engine.start_workers(), 2);
        engine.shutdown();
        assert!(engine.workers.workers().is_empty());
    }

    #[tokio::test]
    async fn test_grpc_agent_rejects_bad_endpoint() {
        let config = AgentConfig::Grpc {
            endpoint: "not a uri".to_string(),
            connect_timeout: std::time::Duration::from_secs(1),
        };
        assert!(build_agent(&config).is_err());
    }
}
