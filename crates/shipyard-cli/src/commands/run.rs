//! Local one-off build of a configured project.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use shipyard_config::{AgentConfig, ServerConfig, load_server_config};
use shipyard_core::provider::{CommitStatus, ProviderClient};
use shipyard_core::store::BuildStore;
use shipyard_core::{BuildStatus, CommitSha};
use shipyard_db::MemoryBuildStore;
use shipyard_executor::LocalAgent;
use shipyard_scheduler::{RunOutcome, RunnerFactory, RunnerParams};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prints commit statuses instead of sending them anywhere.
struct ConsoleProvider;

#[async_trait]
impl ProviderClient for ConsoleProvider {
    async fn last_commit_sha_for_all_open_pull_requests(
        &self,
        _repo_full_name: &str,
        _branches: &BTreeSet<String>,
    ) -> shipyard_core::Result<BTreeSet<CommitSha>> {
        Ok(BTreeSet::new())
    }

    async fn statuses_for_commit_sha(
        &self,
        _repo_full_name: &str,
        _sha: &CommitSha,
    ) -> shipyard_core::Result<Vec<CommitStatus>> {
        Ok(Vec::new())
    }

    async fn head_sha_for_branch(
        &self,
        _repo_full_name: &str,
        _branch: &str,
    ) -> shipyard_core::Result<Option<CommitSha>> {
        Ok(None)
    }

    async fn set_commit_status(
        &self,
        _repo_full_name: &str,
        sha: &CommitSha,
        status: &CommitStatus,
    ) -> shipyard_core::Result<()> {
        println!(
            "* {} {:?}: {}",
            sha.short(),
            status.state,
            status.description.as_deref().unwrap_or("")
        );
        Ok(())
    }
}

/// Run a project's command locally for one commit.
pub async fn run_local(
    config_path: &str,
    project: &str,
    sha: &str,
    branch: Option<String>,
) -> Result<()> {
    let server = load_server_config(Path::new(config_path))
        .with_context(|| format!("Failed to parse config file: {}", config_path))?;

    // Commands run from the directory holding the config file
    let working_dir = Path::new(config_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .canonicalize()
        .context("Failed to resolve working directory")?;
    println!("Working directory: {}", working_dir.display());

    let outcome = build_once(&server, project, sha, branch, working_dir).await?;

    println!("\n--- Output ---");
    for line in outcome.output.logs.iter().filter(|l| !l.is_exit_status()) {
        println!("  {}", line.message);
    }
    for name in outcome.output.artifact_names() {
        println!("  artifact: {}", name);
    }

    let build = &outcome.build;
    println!("\nBuild #{} {}", build.number, build.status);
    if let Some(description) = &build.description {
        println!("  {}", description);
    }

    if build.status == BuildStatus::Succeeded {
        Ok(())
    } else {
        bail!("Build {}", build.status);
    }
}

async fn build_once(
    server: &ServerConfig,
    project: &str,
    sha: &str,
    branch: Option<String>,
    working_dir: PathBuf,
) -> Result<RunOutcome> {
    let project = server
        .projects
        .iter()
        .find(|p| p.id.as_str() == project)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown project: {}", project))?;
    let sha = CommitSha::parse(sha)?;

    let artifact_dir = match &server.agent {
        AgentConfig::Local { artifact_dir, .. } => artifact_dir.clone(),
        AgentConfig::Grpc { .. } => None,
    };
    let agent = Arc::new(LocalAgent::new(Some(working_dir), artifact_dir));
    let store = Arc::new(MemoryBuildStore::new());

    let build = store.create_build(&project.id, &sha, "manual").await?;
    let factory = RunnerFactory::new(agent, store, &server.scheduler).with_process_env();
    let runner = factory.setup(RunnerParams {
        project: Arc::new(project),
        sha,
        credential: "local".to_string(),
        provider: Arc::new(ConsoleProvider),
        build: Some(build),
        trigger: "manual".to_string(),
        branch,
    });

    Ok(runner.run().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_config::parse_server_config;

    const CONFIG: &str = r#"
        agent "local" artifact-dir="out"
        project "app" {
            repo "acme/app"
            command "sh" {
                arg "-c"
                arg "echo building ${git.sha} on ${git.branch} && mkdir -p out && printf ok > out/result.txt"
            }
        }
        project "broken" {
            repo "acme/broken"
            command "sh" {
                arg "-c"
                arg "echo nope >&2; exit 3"
            }
        }
    "#;

    #[tokio::test]
    async fn test_local_build_succeeds_with_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let server = parse_server_config(CONFIG).unwrap();

        let outcome = build_once(
            &server,
            "app",
            "ABC123",
            Some("main".to_string()),
            dir.path().to_path_buf(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.build.status, BuildStatus::Succeeded);
        assert_eq!(outcome.build.trigger, "manual");
        assert!(outcome.output.log_text().contains("building abc123 on main"));
        assert_eq!(outcome.output.artifact("result.txt"), Some(&b"ok"[..]));
    }

    #[tokio::test]
    async fn test_local_build_failure_keeps_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let server = parse_server_config(CONFIG).unwrap();

        let outcome = build_once(&server, "broken", "def456", None, dir.path().to_path_buf())
            .await
            .unwrap();

        assert_eq!(outcome.build.status, BuildStatus::Failed);
        assert_eq!(outcome.build.exit_status, Some(3));
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let server = parse_server_config(CONFIG).unwrap();
        let result = build_once(&server, "missing", "abc123", None, PathBuf::from(".")).await;
        assert!(result.is_err());
    }
}
