//! Local child-process agent implementation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use shipyard_core::agent::{
    Agent, AgentEvent, AgentStream, ArtifactChunk, Command, InvocationError, LogLevel, LogLine,
};
use shipyard_core::{BuildStatus, Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{LinesStream, ReceiverStream};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;

/// Runs commands as child processes of the server, for development and
/// small single-host setups.
///
/// On a zero exit status the invocation moves to `Finishing`, ships every
/// regular file in the artifact directory, and closes with an exit-status
/// log line. A non-zero exit closes with an invocation error instead.
#[derive(Debug, Clone, Default)]
pub struct LocalAgent {
    working_dir: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
}

impl LocalAgent {
    pub fn new(working_dir: Option<PathBuf>, artifact_dir: Option<PathBuf>) -> Self {
        Self {
            working_dir,
            artifact_dir,
        }
    }

    fn resolved_artifact_dir(&self) -> Option<PathBuf> {
        let dir = self.artifact_dir.as_ref()?;
        match &self.working_dir {
            Some(base) if dir.is_relative() => Some(base.join(dir)),
            _ => Some(dir.clone()),
        }
    }
}

#[async_trait]
impl Agent for LocalAgent {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn invoke(&self, command: Command) -> Result<AgentStream> {
        let mut cmd = tokio::process::Command::new(&command.bin);
        cmd.args(&command.parameters)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        info!(bin = %command.bin, args = ?command.parameters, "Spawning local command");
        let child = cmd
            .spawn()
            .map_err(|e| Error::Agent(format!("failed to spawn {}: {}", command.bin, e)))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let artifact_dir = self.resolved_artifact_dir();
        tokio::spawn(drive(command.bin, child, artifact_dir, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

type EventSender = mpsc::Sender<Result<AgentEvent>>;

async fn drive(bin: String, mut child: Child, artifact_dir: Option<PathBuf>, tx: EventSender) {
    if tx.send(Ok(AgentEvent::State(BuildStatus::Running))).await.is_err() {
        return;
    }

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = tx
            .send(Err(Error::Agent("child output was not captured".to_string())))
            .await;
        return;
    };

    let stdout = LinesStream::new(BufReader::new(stdout).lines()).map(|l| (LogLevel::Info, l));
    let stderr = LinesStream::new(BufReader::new(stderr).lines()).map(|l| (LogLevel::Warn, l));
    let mut lines = stdout.merge(stderr);

    while let Some((level, line)) = lines.next().await {
        match line {
            Ok(message) => {
                let event = AgentEvent::Log(LogLine {
                    message,
                    level,
                    status: None,
                    timestamp: Some(Utc::now()),
                });
                if tx.send(Ok(event)).await.is_err() {
                    // Runner went away; kill_on_drop takes the child down.
                    debug!(bin = %bin, "Event receiver dropped");
                    return;
                }
            }
            Err(e) => warn!(bin = %bin, error = %e, "Failed to read command output"),
        }
    }

    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            let _ = tx
                .send(Err(Error::Agent(format!("failed to wait for {}: {}", bin, e))))
                .await;
            return;
        }
    };

    // Killed by a signal leaves no exit code.
    let code = status.code().unwrap_or(-1);
    if !status.success() {
        info!(bin = %bin, exit_status = code, "Local command failed");
        let _ = tx
            .send(Ok(AgentEvent::Error(InvocationError {
                description: format!("{} exited with status {}", bin, code),
                exit_status: Some(code),
                ..Default::default()
            })))
            .await;
        return;
    }

    if tx.send(Ok(AgentEvent::State(BuildStatus::Finishing))).await.is_err() {
        return;
    }

    if let Some(dir) = artifact_dir {
        match collect_artifacts(&dir).await {
            Ok(artifacts) => {
                for artifact in artifacts {
                    if tx.send(Ok(AgentEvent::Artifact(artifact))).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    let _ = tx.send(Ok(AgentEvent::Log(LogLine::exit_status(code)))).await;
}

/// Regular files directly inside `dir`, sorted by name. A missing directory
/// yields nothing.
async fn collect_artifacts(dir: &Path) -> Result<Vec<ArtifactChunk>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::Agent(format!(
                "failed to list artifacts in {}: {}",
                dir.display(),
                e
            )));
        }
    };

    let read_err =
        |e: std::io::Error| Error::Agent(format!("failed to read artifacts in {}: {}", dir.display(), e));

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        if entry.file_type().await.map_err(read_err)?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut artifacts = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(&path).await.map_err(read_err)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        artifacts.push(ArtifactChunk {
            filename,
            chunk: Bytes::from(data),
        });
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(agent: &LocalAgent, script: &str) -> Vec<AgentEvent> {
        let command = Command::new("sh").arg("-c").arg(script);
        let stream = agent.invoke(command).await.unwrap();
        stream.map(|e| e.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_successful_command() {
        let agent = LocalAgent::default();
        let events = run(&agent, "echo hello; echo oops 1>&2").await;

        assert_eq!(events.first(), Some(&AgentEvent::State(BuildStatus::Running)));
        assert_eq!(events.last(), Some(&AgentEvent::Log(LogLine::exit_status(0))));
        assert!(events.contains(&AgentEvent::State(BuildStatus::Finishing)));

        let logs: Vec<(String, LogLevel)> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Log(line) if line.status.is_none() => {
                    Some((line.message.clone(), line.level))
                }
                _ => None,
            })
            .collect();
        assert!(logs.contains(&("hello".to_string(), LogLevel::Info)));
        assert!(logs.contains(&("oops".to_string(), LogLevel::Warn)));
    }

    #[tokio::test]
    async fn test_failing_command_reports_error() {
        let agent = LocalAgent::default();
        let events = run(&agent, "echo building; exit 3").await;

        match events.last() {
            Some(AgentEvent::Error(err)) => assert_eq!(err.exit_status, Some(3)),
            other => panic!("expected invocation error, got {:?}", other),
        }
        assert!(!events.contains(&AgentEvent::State(BuildStatus::Finishing)));
    }

    #[tokio::test]
    async fn test_artifacts_are_shipped_after_finishing() {
        let dir = tempfile::tempdir().unwrap();
        let agent = LocalAgent::new(Some(dir.path().to_path_buf()), Some(PathBuf::from("out")));
        let events = run(&agent, "mkdir -p out && printf '<ok/>' > out/report.xml").await;

        let finishing = events
            .iter()
            .position(|e| *e == AgentEvent::State(BuildStatus::Finishing))
            .unwrap();
        let artifact = events
            .iter()
            .position(|e| matches!(e, AgentEvent::Artifact(_)))
            .unwrap();
        assert!(finishing < artifact);
        assert_eq!(
            events[artifact],
            AgentEvent::Artifact(ArtifactChunk {
                filename: "report.xml".to_string(),
                chunk: Bytes::from_static(b"<ok/>"),
            })
        );
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let agent = LocalAgent::default();
        let result = agent.invoke(Command::new("/nonexistent/shipyard-test-bin")).await;
        assert!(matches!(result, Err(Error::Agent(_))));
    }

    #[tokio::test]
    async fn test_command_env_is_passed() {
        let agent = LocalAgent::default();
        let command = Command::new("sh")
            .arg("-c")
            .arg("echo $LANE")
            .env("LANE", "beta");
        let events: Vec<AgentEvent> = agent
            .invoke(command)
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert!(events.iter().any(|e| matches!(e, AgentEvent::Log(l) if l.message == "beta")));
    }
}
