//! CLI command implementations.

pub mod api;
pub mod builds;
pub mod run;
pub mod runners;

use anyhow::Result;
use serde::Deserialize;
use shipyard_config::server::unmatched;
use shipyard_config::{AgentConfig, ServerConfig, parse_server_config};

use api::ApiClient;

pub fn validate(path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    match parse_server_config(&content) {
        Ok(config) => {
            for line in summarize(&config) {
                println!("{}", line);
            }
            println!("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Human readable overview of a parsed configuration, warnings last.
fn summarize(config: &ServerConfig) -> Vec<String> {
    let mut lines = vec![format!("Listen: {}", config.listen)];
    lines.push(match &config.agent {
        AgentConfig::Grpc { endpoint, .. } => format!("Agent: grpc {}", endpoint),
        AgentConfig::Local { .. } => "Agent: local".to_string(),
    });
    lines.push(format!(
        "Scheduler: concurrency {}, poll every {}s",
        config.scheduler.concurrency,
        config.scheduler.poll_interval.as_secs()
    ));

    for project in &config.projects {
        let triggers: Vec<String> = project
            .job_triggers
            .iter()
            .map(|t| format!("{}:{}", t.kind(), t.branch()))
            .collect();
        lines.push(format!(
            "Project {} ({} on {}) [{}]",
            project.id,
            project.repo_config.full_name,
            project.repo_config.provider,
            triggers.join(", ")
        ));
    }

    let (idle_credentials, orphan_projects) = unmatched(config);
    for name in idle_credentials {
        lines.push(format!("warning: credential '{}' serves no project", name));
    }
    for name in orphan_projects {
        lines.push(format!("warning: no credential serves project '{}'", name));
    }
    lines
}

#[derive(Debug, Deserialize)]
struct WorkerView {
    project: String,
    credential: String,
    running: bool,
    iterations: u64,
    failures: u64,
    last_error: Option<String>,
}

pub async fn workers(api: &ApiClient) -> Result<()> {
    let workers: Vec<WorkerView> = api.get("workers").await?;
    if workers.is_empty() {
        println!("No worker loops");
    }
    for worker in &workers {
        println!(
            "{:<20} {:<12} {:<8} polls={} failures={}",
            worker.project,
            worker.credential,
            if worker.running { "running" } else { "stopped" },
            worker.iterations,
            worker.failures
        );
        if let Some(error) = &worker.last_error {
            println!("  last error: {}", error);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_flags_unmatched_entries() {
        let config = parse_server_config(
            r#"
            agent "grpc" endpoint="http://agent:50051"
            credential "ci-bot" provider="github" token-env="GITHUB_TOKEN"
            project "app" {
                repo "acme/app"
                trigger "commit" branch="main"
                command "make"
            }
            project "mirror" {
                repo "acme/mirror" provider="gitlab"
                command "make"
            }
            "#,
        )
        .unwrap();

        let summary = summarize(&config);
        assert!(summary.contains(&"Agent: grpc http://agent:50051".to_string()));
        assert!(summary.iter().any(|l| l.starts_with("Project app (acme/app on github) [commit:main]")));
        assert_eq!(
            summary.last().unwrap(),
            "warning: no credential serves project 'mirror'"
        );
    }
}
