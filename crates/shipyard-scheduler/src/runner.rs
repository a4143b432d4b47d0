//! Build runner: drives one agent invocation for one (project, commit).
//!
//! The runner consumes the agent's event stream strictly in order and maps
//! it onto the build state machine:
//!
//! ```text
//! PENDING -> RUNNING -> FINISHING -> SUCCEEDED (clean close)
//!    |          |           |
//!    +----------+-----------+--> FAILED | BROKEN | REJECTED
//! ```
//!
//! Once terminal, further messages are counted as anomalies and ignored.
//! A stream that stalls past the inactivity timeout, breaks, closes early or
//! violates the protocol resolves the build to `BROKEN`.

use bytes::BytesMut;
use chrono::Utc;
use futures::StreamExt;
use shipyard_config::{SchedulerSettings, VariableContext, VariableContextBuilder};
use shipyard_core::agent::{Agent, AgentEvent, ArtifactChunk, Command, InvocationError, LogLine};
use shipyard_core::build::BuildUpdate;
use shipyard_core::provider::{CommitStatus, CommitStatusState, ProviderClient};
use shipyard_core::store::BuildStore;
use shipyard_core::{Build, BuildStatus, CommitSha, Error, Project, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::RunnerKey;

/// Buffered log lines are written once this many accumulate.
const LOG_FLUSH_THRESHOLD: usize = 256;

/// How long a terminal build keeps reading for the agent to close its stream.
const TERMINAL_DRAIN: Duration = Duration::from_secs(5);

/// Everything a runner needs to know about the build it will drive.
pub struct RunnerParams {
    pub project: Arc<Project>,
    pub sha: CommitSha,
    /// Name of the credential the provider client was built from.
    pub credential: String,
    pub provider: Arc<dyn ProviderClient>,
    /// Existing durable record (resumed builds). `None` lets the runner
    /// service create one at admission.
    pub build: Option<Build>,
    pub trigger: String,
    pub branch: Option<String>,
}

/// Shared collaborators for every runner.
pub struct RunnerFactory {
    agent: Arc<dyn Agent>,
    store: Arc<dyn BuildStore>,
    inactivity_timeout: Duration,
    status_context: String,
    variables: VariableContext,
}

impl RunnerFactory {
    pub fn new(
        agent: Arc<dyn Agent>,
        store: Arc<dyn BuildStore>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            agent,
            store,
            inactivity_timeout: settings.inactivity_timeout,
            status_context: settings.status_context.clone(),
            variables: VariableContext::new(),
        }
    }

    /// Expose the server's environment as `${env.NAME}` to commands.
    pub fn with_process_env(mut self) -> Self {
        self.variables.populate_env();
        self
    }

    pub fn store(&self) -> &Arc<dyn BuildStore> {
        &self.store
    }

    /// Prepare a runner without starting it.
    pub fn setup(&self, params: RunnerParams) -> BuildRunner {
        let variables = VariableContextBuilder::from_context(self.variables.clone())
            .with_git_sha(params.sha.as_str())
            .with_git_branch(params.branch.clone().unwrap_or_default())
            .with_project(params.project.id.as_str(), &params.project.repo_config.full_name)
            .build();
        let (status_tx, _) = watch::channel(
            params
                .build
                .as_ref()
                .map(|b| b.status)
                .unwrap_or(BuildStatus::Pending),
        );

        BuildRunner {
            project: params.project,
            sha: params.sha,
            credential: params.credential,
            provider: params.provider,
            build: params.build,
            trigger: params.trigger,
            variables,
            agent: self.agent.clone(),
            store: self.store.clone(),
            inactivity_timeout: self.inactivity_timeout,
            status_context: self.status_context.clone(),
            cancel: CancellationToken::new(),
            status_tx,
        }
    }
}

/// What a runner reconstructed from the agent stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOutput {
    /// Every status the build passed through, starting with the initial one.
    pub states: Vec<BuildStatus>,
    /// Log lines in arrival order, including the closing exit-status line.
    pub logs: Vec<LogLine>,
    artifacts: Vec<(String, BytesMut)>,
    pub exit_status: Option<i32>,
    pub error: Option<InvocationError>,
    /// Messages that broke the protocol or arrived after a terminal state.
    pub anomalies: usize,
}

impl BuildOutput {
    pub fn final_status(&self) -> Option<BuildStatus> {
        self.states.last().copied()
    }

    /// Log messages joined with newlines, without the exit-status line.
    pub fn log_text(&self) -> String {
        self.logs
            .iter()
            .filter(|l| !l.is_exit_status())
            .map(|l| l.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Artifact names in the order they first appeared.
    pub fn artifact_names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn artifact(&self, filename: &str) -> Option<&[u8]> {
        self.artifacts
            .iter()
            .find(|(name, _)| name == filename)
            .map(|(_, data)| data.as_ref())
    }

    fn push_log(&mut self, line: LogLine) {
        if line.is_exit_status() {
            self.exit_status = line.status;
        }
        self.logs.push(line);
    }

    /// Mark a trailing blank line as the closing exit-status line of a
    /// cleanly closed stream. Returns the marked line.
    fn close_logs(&mut self) -> Option<&LogLine> {
        let last = self.logs.last_mut()?;
        if last.message.is_empty() && last.status.is_none() {
            last.status = Some(0);
        }
        if !last.is_exit_status() {
            return None;
        }
        self.exit_status = last.status;
        Some(last)
    }

    fn push_artifact(&mut self, chunk: ArtifactChunk) {
        match self.artifacts.iter().position(|(name, _)| *name == chunk.filename) {
            Some(i) => self.artifacts[i].1.extend_from_slice(&chunk.chunk),
            None => self
                .artifacts
                .push((chunk.filename, BytesMut::from(chunk.chunk.as_ref()))),
        }
    }
}

/// Result of driving one build to completion.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub build: Build,
    pub output: BuildOutput,
}

/// One active or about-to-start execution of a build.
pub struct BuildRunner {
    project: Arc<Project>,
    sha: CommitSha,
    credential: String,
    provider: Arc<dyn ProviderClient>,
    build: Option<Build>,
    trigger: String,
    variables: VariableContext,
    agent: Arc<dyn Agent>,
    store: Arc<dyn BuildStore>,
    inactivity_timeout: Duration,
    status_context: String,
    cancel: CancellationToken,
    status_tx: watch::Sender<BuildStatus>,
}

enum Step {
    Event(AgentEvent),
    Failed(Error),
    Closed,
    TimedOut,
    Aborted,
}

struct Progress {
    state: BuildStatus,
    build: Build,
    output: BuildOutput,
    unflushed: Vec<LogLine>,
}

impl BuildRunner {
    pub fn key(&self) -> RunnerKey {
        RunnerKey::new(self.project.id.clone(), self.sha.clone())
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn sha(&self) -> &CommitSha {
        &self.sha
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn build(&self) -> Option<&Build> {
        self.build.as_ref()
    }

    /// Bind the durable record created at admission.
    pub fn attach_build(&mut self, build: Build) {
        self.status_tx.send_replace(build.status);
        self.build = Some(build);
    }

    /// Token that aborts this runner when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live view of the runner's status.
    pub fn subscribe(&self) -> watch::Receiver<BuildStatus> {
        self.status_tx.subscribe()
    }

    /// The command sent to the agent, with `${...}` variables expanded.
    pub fn command(&self) -> Command {
        let variables = match &self.build {
            Some(build) => VariableContextBuilder::from_context(self.variables.clone())
                .with_build(build.id.to_string(), build.number, &self.trigger)
                .build(),
            None => self.variables.clone(),
        };
        variables.interpolate_command(&self.project.command)
    }

    /// Drive the invocation until the build is terminal.
    pub async fn run(self) -> Result<RunOutcome> {
        let build = self.build.clone().ok_or_else(|| {
            Error::Internal(format!(
                "runner for {}@{} has no build record",
                self.project.id, self.sha
            ))
        })?;

        let mut progress = Progress {
            state: build.status,
            output: BuildOutput {
                states: vec![build.status],
                ..Default::default()
            },
            build,
            unflushed: Vec::new(),
        };

        if progress.state != BuildStatus::Pending {
            warn!(
                project = %self.project.id,
                sha = %self.sha,
                status = %progress.state,
                "Build is no longer pending, not starting"
            );
            return Ok(progress.into_outcome());
        }

        let command = self.command();
        info!(
            project = %self.project.id,
            sha = %self.sha,
            build = progress.build.number,
            bin = %command.bin,
            agent = self.agent.name(),
            "Starting build"
        );
        self.report(&progress.build, CommitStatusState::Pending, "started")
            .await;

        let invoked = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            r = timeout(self.inactivity_timeout, self.agent.invoke(command)) => match r {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout("agent did not accept the invocation".to_string())),
            },
        };

        let mut stream = match invoked {
            Ok(stream) => stream,
            Err(Error::Cancelled) => {
                self.transition(&mut progress, BuildStatus::Broken, Some("aborted".to_string()))
                    .await;
                return Ok(progress.into_outcome());
            }
            Err(e) => {
                warn!(project = %self.project.id, sha = %self.sha, error = %e, "Agent invocation failed");
                self.transition(
                    &mut progress,
                    BuildStatus::Broken,
                    Some(format!("agent invocation failed: {}", e)),
                )
                .await;
                return Ok(progress.into_outcome());
            }
        };

        loop {
            let wait = if progress.state.is_terminal() {
                TERMINAL_DRAIN.min(self.inactivity_timeout)
            } else {
                self.inactivity_timeout
            };
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Aborted,
                next = timeout(wait, stream.next()) => match next {
                    Err(_) => Step::TimedOut,
                    Ok(None) => Step::Closed,
                    Ok(Some(Err(e))) => Step::Failed(e),
                    Ok(Some(Ok(event))) => Step::Event(event),
                },
            };

            if progress.state.is_terminal() {
                match step {
                    Step::Event(event) => {
                        progress.output.anomalies += 1;
                        warn!(
                            project = %self.project.id,
                            sha = %self.sha,
                            status = %progress.state,
                            event = event_kind(&event),
                            "Ignoring agent message after terminal state"
                        );
                        continue;
                    }
                    _ => break,
                }
            }

            match step {
                Step::Event(AgentEvent::State(next)) => self.on_state(&mut progress, next).await,
                Step::Event(AgentEvent::Log(line)) => {
                    progress.output.push_log(line.clone());
                    progress.unflushed.push(line);
                    if progress.unflushed.len() >= LOG_FLUSH_THRESHOLD {
                        self.flush_logs(&mut progress).await;
                    }
                }
                Step::Event(AgentEvent::Artifact(chunk)) => progress.output.push_artifact(chunk),
                Step::Event(AgentEvent::Error(err)) => {
                    let description = err.description.clone();
                    if err.exit_status.is_some() {
                        progress.output.exit_status = err.exit_status;
                    }
                    progress.output.error = Some(err);
                    self.transition(&mut progress, BuildStatus::Failed, Some(description))
                        .await;
                    // The agent closes the stream right after an error.
                    break;
                }
                Step::Failed(e) => {
                    if matches!(e, Error::Protocol(_)) {
                        progress.output.anomalies += 1;
                    }
                    warn!(project = %self.project.id, sha = %self.sha, error = %e, "Agent stream failed");
                    self.transition(&mut progress, BuildStatus::Broken, Some(e.to_string()))
                        .await;
                    break;
                }
                Step::Closed => {
                    if progress.state == BuildStatus::Finishing {
                        if let Some(closing) = progress.output.close_logs().cloned() {
                            if let Some(last) = progress.unflushed.last_mut() {
                                if last.message.is_empty() {
                                    *last = closing;
                                }
                            }
                        }
                        self.transition(&mut progress, BuildStatus::Succeeded, None)
                            .await;
                    } else {
                        let description = format!("agent stream closed while {}", progress.state);
                        self.transition(&mut progress, BuildStatus::Broken, Some(description))
                            .await;
                    }
                    break;
                }
                Step::TimedOut => {
                    warn!(
                        project = %self.project.id,
                        sha = %self.sha,
                        timeout_secs = self.inactivity_timeout.as_secs(),
                        "Agent stream went silent"
                    );
                    self.transition(
                        &mut progress,
                        BuildStatus::Broken,
                        Some(format!(
                            "no message from agent for {}s",
                            self.inactivity_timeout.as_secs()
                        )),
                    )
                    .await;
                    break;
                }
                Step::Aborted => {
                    info!(project = %self.project.id, sha = %self.sha, "Build aborted");
                    self.transition(&mut progress, BuildStatus::Broken, Some("aborted".to_string()))
                        .await;
                    break;
                }
            }
        }

        self.flush_logs(&mut progress).await;
        info!(
            project = %self.project.id,
            sha = %self.sha,
            build = progress.build.number,
            status = %progress.state,
            anomalies = progress.output.anomalies,
            "Build finished"
        );
        Ok(progress.into_outcome())
    }

    async fn on_state(&self, progress: &mut Progress, next: BuildStatus) {
        let current = progress.state;
        if next == current && next != BuildStatus::Pending {
            debug!(project = %self.project.id, sha = %self.sha, status = %next, "Repeated state");
            return;
        }

        if next == BuildStatus::Pending || !current.can_transition_to(next) {
            progress.output.anomalies += 1;
            warn!(
                project = %self.project.id,
                sha = %self.sha,
                from = %current,
                to = %next,
                "Agent sent an illegal state transition"
            );
            self.transition(
                progress,
                BuildStatus::Broken,
                Some(format!("protocol error: {} after {}", next, current)),
            )
            .await;
            return;
        }

        self.transition(progress, next, None).await;
    }

    async fn transition(&self, progress: &mut Progress, next: BuildStatus, description: Option<String>) {
        let from = progress.state;
        progress.state = next;
        progress.output.states.push(next);
        self.status_tx.send_replace(next);
        info!(
            project = %self.project.id,
            sha = %self.sha,
            build = progress.build.number,
            from = %from,
            to = %next,
            "Build transitioned"
        );

        self.flush_logs(progress).await;

        let update = BuildUpdate {
            status: next,
            description,
            exit_status: if next.is_terminal() {
                progress.output.exit_status
            } else {
                None
            },
        };
        match self.store.update_status(progress.build.id, update.clone()).await {
            Ok(build) => progress.build = build,
            Err(e) => {
                warn!(build_id = %progress.build.id, error = %e, "Failed to persist build status");
                if let Err(e) = progress.build.apply(&update, Utc::now()) {
                    warn!(build_id = %progress.build.id, error = %e, "Build record rejected status update");
                }
            }
        }

        if next.is_terminal() {
            self.persist_artifacts(progress).await;
            let (state, text) = match next {
                BuildStatus::Succeeded => (CommitStatusState::Success, "succeeded"),
                BuildStatus::Failed => (CommitStatusState::Failure, "failed"),
                BuildStatus::Rejected => (CommitStatusState::Error, "was rejected by the agent"),
                _ => (CommitStatusState::Error, "broke"),
            };
            self.report(&progress.build, state, text).await;
        }
    }

    async fn flush_logs(&self, progress: &mut Progress) {
        if progress.unflushed.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut progress.unflushed);
        if let Err(e) = self.store.append_logs(progress.build.id, &lines).await {
            warn!(build_id = %progress.build.id, lines = lines.len(), error = %e, "Failed to store build logs");
        }
    }

    async fn persist_artifacts(&self, progress: &Progress) {
        for (filename, data) in &progress.output.artifacts {
            if let Err(e) = self
                .store
                .put_artifact(progress.build.id, filename, data.clone().freeze())
                .await
            {
                warn!(build_id = %progress.build.id, filename = %filename, error = %e, "Failed to store artifact");
            }
        }
    }

    /// Report to the provider. Failures never change the build outcome.
    async fn report(&self, build: &Build, state: CommitStatusState, text: &str) {
        let status = CommitStatus {
            state,
            context: self.status_context.clone(),
            description: Some(format!("Build #{} {}", build.number, text)),
            target_url: None,
        };
        if let Err(e) = self
            .provider
            .set_commit_status(&self.project.repo_config.full_name, &self.sha, &status)
            .await
        {
            warn!(
                project = %self.project.id,
                sha = %self.sha,
                error = %e,
                "Failed to report commit status"
            );
        }
    }
}

impl Progress {
    fn into_outcome(self) -> RunOutcome {
        RunOutcome {
            build: self.build,
            output: self.output,
        }
    }
}

fn event_kind(event: &AgentEvent) -> &'static str {
    match event {
        AgentEvent::State(_) => "state",
        AgentEvent::Log(_) => "log",
        AgentEvent::Artifact(_) => "artifact",
        AgentEvent::Error(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(name: &str, data: &'static [u8]) -> ArtifactChunk {
        ArtifactChunk {
            filename: name.to_string(),
            chunk: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_artifact_chunks_concatenate_per_filename() {
        let mut output = BuildOutput::default();
        output.push_artifact(chunk("app.ipa", b"ab"));
        output.push_artifact(chunk("report.xml", b"<r>"));
        output.push_artifact(chunk("app.ipa", b"cd"));
        output.push_artifact(chunk("report.xml", b"</r>"));

        assert_eq!(output.artifact_names(), vec!["app.ipa", "report.xml"]);
        assert_eq!(output.artifact("app.ipa"), Some(&b"abcd"[..]));
        assert_eq!(output.artifact("report.xml"), Some(&b"<r></r>"[..]));
        assert_eq!(output.artifact("missing"), None);
    }

    #[test]
    fn test_exit_status_line_is_kept_out_of_log_text() {
        let mut output = BuildOutput::default();
        output.push_log(LogLine::info("compiling"));
        output.push_log(LogLine::info("testing"));
        output.push_log(LogLine::exit_status(0));

        assert_eq!(output.log_text(), "compiling\ntesting");
        assert_eq!(output.exit_status, Some(0));
        assert_eq!(output.logs.len(), 3);
    }
}
