//! Fakes shared by the orchestration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use shipyard_config::SchedulerSettings;
use shipyard_core::agent::{
    Agent, AgentEvent, AgentStream, ArtifactChunk, Command, LogLine,
};
use shipyard_core::project::{GitProvider, JobTrigger, RepoConfig};
use shipyard_core::provider::{
    CommitStatus, CommitStatusState, GitHubCredential, ProviderClient, ProviderClientFactory,
    ProviderCredential,
};
use shipyard_core::store::BuildStore;
use shipyard_core::{BuildStatus, CommitSha, Error, Project, ProjectId, Result};
use shipyard_db::MemoryBuildStore;
use shipyard_scheduler::{BuildRunnerService, RunnerFactory, RunnerParams, TaskQueue};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

pub fn sha(s: &str) -> CommitSha {
    CommitSha::parse(s).unwrap()
}

pub fn state(status: BuildStatus) -> AgentEvent {
    AgentEvent::State(status)
}

pub fn log(message: &str) -> AgentEvent {
    AgentEvent::Log(LogLine::info(message))
}

pub fn exit(status: i32) -> AgentEvent {
    AgentEvent::Log(LogLine::exit_status(status))
}

pub fn artifact(filename: &str, data: &'static [u8]) -> AgentEvent {
    AgentEvent::Artifact(ArtifactChunk {
        filename: filename.to_string(),
        chunk: Bytes::from_static(data),
    })
}

/// How a scripted stream ends once its events are sent.
#[derive(Debug, Clone)]
pub enum Ending {
    Close,
    Stall,
    Fail(String),
}

/// Agent replaying the same script for every invocation.
pub struct ScriptedAgent {
    events: Vec<AgentEvent>,
    ending: Ending,
    /// Each invocation takes one permit before sending anything.
    gate: Option<Arc<Semaphore>>,
    invocations: Mutex<Vec<Command>>,
}

impl ScriptedAgent {
    pub fn new(events: Vec<AgentEvent>) -> Self {
        Self {
            events,
            ending: Ending::Close,
            gate: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// A well-behaved successful build.
    pub fn succeeding() -> Self {
        Self::new(vec![
            state(BuildStatus::Running),
            log("building"),
            state(BuildStatus::Finishing),
            exit(0),
        ])
    }

    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn invocations(&self) -> Vec<Command> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn invoke(&self, command: Command) -> Result<AgentStream> {
        self.invocations.lock().unwrap().push(command);

        let (tx, rx) = mpsc::channel(16);
        let events = self.events.clone();
        let ending = self.ending.clone();
        let gate = self.gate.clone();

        tokio::spawn(async move {
            if let Some(gate) = gate {
                match gate.acquire_owned().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => return,
                }
            }
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            match ending {
                Ending::Close => {}
                Ending::Stall => tx.closed().await,
                Ending::Fail(message) => {
                    let _ = tx.send(Err(Error::Agent(message))).await;
                }
            }
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// In-memory provider.
#[derive(Default)]
pub struct FakeProvider {
    heads: Mutex<HashMap<String, CommitSha>>,
    open_prs: Mutex<Vec<(String, CommitSha)>>,
    statuses: Mutex<HashMap<CommitSha, Vec<CommitStatus>>>,
    failing: AtomicBool,
    panicking: AtomicBool,
    pub polls: AtomicUsize,
}

impl FakeProvider {
    pub fn with_head(self, branch: &str, head: &str) -> Self {
        self.heads.lock().unwrap().insert(branch.to_string(), sha(head));
        self
    }

    pub fn with_open_pr(self, base: &str, head: &str) -> Self {
        self.open_prs
            .lock()
            .unwrap()
            .push((base.to_string(), sha(head)));
        self
    }

    pub fn with_status(self, head: &str) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .entry(sha(head))
            .or_default()
            .push(CommitStatus {
                state: CommitStatusState::Success,
                context: "legacy-ci".to_string(),
                description: None,
                target_url: None,
            });
        self
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    pub fn panicking(self) -> Self {
        self.panicking.store(true, Ordering::SeqCst);
        self
    }

    /// States reported for a commit, oldest first.
    pub fn reported(&self, head: &CommitSha) -> Vec<CommitStatusState> {
        let mut states: Vec<CommitStatusState> = self
            .statuses
            .lock()
            .unwrap()
            .get(head)
            .map(|s| {
                s.iter()
                    .filter(|s| s.context == "shipyard")
                    .map(|s| s.state)
                    .collect()
            })
            .unwrap_or_default();
        states.reverse();
        states
    }

    fn check(&self) -> Result<()> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.panicking.load(Ordering::SeqCst) {
            panic!("provider exploded");
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Provider("provider unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn last_commit_sha_for_all_open_pull_requests(
        &self,
        _repo_full_name: &str,
        branches: &BTreeSet<String>,
    ) -> Result<BTreeSet<CommitSha>> {
        self.check()?;
        Ok(self
            .open_prs
            .lock()
            .unwrap()
            .iter()
            .filter(|(base, _)| branches.contains(base))
            .map(|(_, head)| head.clone())
            .collect())
    }

    async fn statuses_for_commit_sha(
        &self,
        _repo_full_name: &str,
        sha: &CommitSha,
    ) -> Result<Vec<CommitStatus>> {
        self.check()?;
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(sha)
            .cloned()
            .unwrap_or_default())
    }

    async fn head_sha_for_branch(
        &self,
        _repo_full_name: &str,
        branch: &str,
    ) -> Result<Option<CommitSha>> {
        self.check()?;
        Ok(self.heads.lock().unwrap().get(branch).cloned())
    }

    async fn set_commit_status(
        &self,
        _repo_full_name: &str,
        sha: &CommitSha,
        status: &CommitStatus,
    ) -> Result<()> {
        // Newest first, as providers list them.
        self.statuses
            .lock()
            .unwrap()
            .entry(sha.clone())
            .or_default()
            .insert(0, status.clone());
        Ok(())
    }
}

/// Hands out fake providers by credential name.
#[derive(Default)]
pub struct FakeProviders {
    by_credential: Mutex<HashMap<String, Arc<FakeProvider>>>,
}

impl FakeProviders {
    pub fn with(self, credential: &str, provider: Arc<FakeProvider>) -> Self {
        self.by_credential
            .lock()
            .unwrap()
            .insert(credential.to_string(), provider);
        self
    }
}

impl ProviderClientFactory for FakeProviders {
    fn client_for(&self, credential: &ProviderCredential) -> Arc<dyn ProviderClient> {
        self.by_credential
            .lock()
            .unwrap()
            .entry(credential.name().to_string())
            .or_default()
            .clone()
    }
}

pub fn credential(name: &str) -> ProviderCredential {
    ProviderCredential::Github(GitHubCredential {
        name: name.to_string(),
        token: "token".to_string(),
    })
}

pub fn project(name: &str, repo: &str, triggers: Vec<JobTrigger>) -> Project {
    project_on(name, repo, GitProvider::Github, triggers)
}

pub fn project_on(
    name: &str,
    repo: &str,
    provider: GitProvider,
    triggers: Vec<JobTrigger>,
) -> Project {
    Project {
        id: ProjectId::new(name),
        repo_config: RepoConfig {
            full_name: repo.to_string(),
            provider,
        },
        job_triggers: triggers,
        command: Command::new("fastlane")
            .arg("test")
            .env("SHA", "${git.sha}")
            .env("BUILD", "${build.number}"),
    }
}

pub fn commit_trigger(branch: &str) -> JobTrigger {
    JobTrigger::Commit {
        branch: branch.to_string(),
    }
}

pub fn pr_trigger(branch: &str) -> JobTrigger {
    JobTrigger::PullRequest {
        branch: branch.to_string(),
    }
}

pub fn settings() -> SchedulerSettings {
    SchedulerSettings {
        concurrency: 4,
        poll_interval: Duration::from_secs(1),
        inactivity_timeout: Duration::from_secs(30),
        status_context: "shipyard".to_string(),
    }
}

/// Runner service wired to a memory store and a scripted agent.
pub struct Harness {
    pub store: Arc<MemoryBuildStore>,
    pub agent: Arc<ScriptedAgent>,
    pub factory: Arc<RunnerFactory>,
    pub runners: BuildRunnerService,
}

impl Harness {
    pub fn new(agent: ScriptedAgent) -> Self {
        Self::with_settings(agent, settings())
    }

    pub fn with_settings(agent: ScriptedAgent, settings: SchedulerSettings) -> Self {
        let store = Arc::new(MemoryBuildStore::new());
        let agent = Arc::new(agent);
        let store_dyn: Arc<dyn BuildStore> = store.clone();
        let factory = Arc::new(RunnerFactory::new(agent.clone(), store_dyn.clone(), &settings));
        let runners = BuildRunnerService::new(TaskQueue::new(settings.concurrency), store_dyn);

        Self {
            store,
            agent,
            factory,
            runners,
        }
    }

    pub fn params(
        &self,
        project: &Arc<Project>,
        head: &str,
        provider: &Arc<FakeProvider>,
    ) -> RunnerParams {
        RunnerParams {
            project: project.clone(),
            sha: sha(head),
            credential: "ci-bot".to_string(),
            provider: provider.clone(),
            build: None,
            trigger: "commit".to_string(),
            branch: Some("main".to_string()),
        }
    }
}

/// Poll `condition` while letting (possibly paused) time advance.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached");
}
