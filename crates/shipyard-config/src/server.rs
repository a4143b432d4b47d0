//! Server configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use shipyard_core::agent::Command;
use shipyard_core::project::{GitProvider, JobTrigger, RepoConfig};
use shipyard_core::provider::{GitHubCredential, ProviderCredential};
use shipyard_core::{Project, ProjectId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

static REPO_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").unwrap());

pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the status HTTP surface.
    pub listen: String,
    pub scheduler: SchedulerSettings,
    pub agent: AgentConfig,
    pub credentials: Vec<CredentialConfig>,
    pub projects: Vec<Project>,
}

/// Tuning for the orchestration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Maximum number of builds driven at once.
    pub concurrency: usize,
    /// Delay between two polls of one worker loop.
    pub poll_interval: Duration,
    /// Longest silence tolerated on an agent stream.
    pub inactivity_timeout: Duration,
    /// Context name used for commit statuses.
    pub status_context: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(60),
            inactivity_timeout: Duration::from_secs(600),
            status_context: "shipyard".to_string(),
        }
    }
}

/// Which agent executes builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentConfig {
    /// Remote agent reached over gRPC.
    Grpc {
        endpoint: String,
        connect_timeout: Duration,
    },
    /// Commands run as local child processes (development).
    Local {
        working_dir: Option<PathBuf>,
        artifact_dir: Option<PathBuf>,
    },
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig::Local {
            working_dir: None,
            artifact_dir: None,
        }
    }
}

/// A credential as written in the configuration. The token itself lives in
/// the environment variable named by `token_env`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialConfig {
    pub name: String,
    pub provider: GitProvider,
    pub token_env: String,
}

impl CredentialConfig {
    /// Resolve the token and build a credential for a supported provider.
    pub fn resolve(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<ProviderCredential> {
        let token = lookup(&self.token_env).filter(|t| !t.is_empty()).ok_or_else(|| {
            ConfigError::MissingField(format!(
                "environment variable {} for credential '{}'",
                self.token_env, self.name
            ))
        })?;

        match self.provider {
            GitProvider::Github => Ok(ProviderCredential::Github(GitHubCredential {
                name: self.name.clone(),
                token,
            })),
            GitProvider::Gitlab | GitProvider::Bitbucket => Err(ConfigError::InvalidValue {
                field: format!("credential '{}' provider", self.name),
                message: format!("provider {} is not supported", self.provider),
            }),
        }
    }
}

/// Read and parse a configuration file.
pub fn load_server_config(path: &Path) -> ConfigResult<ServerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_server_config(&content)
}

/// Parse server configuration from KDL text.
pub fn parse_server_config(kdl: &str) -> ConfigResult<ServerConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut listen = DEFAULT_LISTEN.to_string();
    let mut scheduler = SchedulerSettings::default();
    let mut agent = AgentConfig::default();
    let mut credentials: Vec<CredentialConfig> = Vec::new();
    let mut projects: Vec<Project> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                if let Some(addr) = get_string_prop(node, "listen") {
                    listen = addr;
                }
            }
            "scheduler" => {
                scheduler = parse_scheduler(node)?;
            }
            "agent" => {
                agent = parse_agent(node)?;
            }
            "credential" => {
                let credential = parse_credential(node)?;
                if credentials.iter().any(|c| c.name == credential.name) {
                    return Err(ConfigError::Duplicate(format!(
                        "credential '{}'",
                        credential.name
                    )));
                }
                credentials.push(credential);
            }
            "project" => {
                let project = parse_project(node)?;
                if projects.iter().any(|p| p.id == project.id) {
                    return Err(ConfigError::Duplicate(format!("project '{}'", project.id)));
                }
                projects.push(project);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(ServerConfig {
        listen,
        scheduler,
        agent,
        credentials,
        projects,
    })
}

fn parse_scheduler(node: &KdlNode) -> ConfigResult<SchedulerSettings> {
    let mut settings = SchedulerSettings::default();

    if let Some(concurrency) = get_integer_prop(node, "concurrency")? {
        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        settings.concurrency = concurrency as usize;
    }
    if let Some(secs) = get_integer_prop(node, "poll-interval-secs")? {
        settings.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = get_integer_prop(node, "inactivity-timeout-secs")? {
        settings.inactivity_timeout = Duration::from_secs(secs);
    }
    if let Some(context) = get_string_prop(node, "status-context") {
        settings.status_context = context;
    }

    Ok(settings)
}

fn parse_agent(node: &KdlNode) -> ConfigResult<AgentConfig> {
    let kind = get_first_string_arg(node).unwrap_or_default();

    match kind.as_str() {
        "grpc" => {
            let endpoint = get_string_prop(node, "endpoint")
                .ok_or_else(|| ConfigError::MissingField("agent endpoint".to_string()))?;
            let connect_timeout = get_integer_prop(node, "connect-timeout-secs")?.unwrap_or(10);
            Ok(AgentConfig::Grpc {
                endpoint,
                connect_timeout: Duration::from_secs(connect_timeout),
            })
        }
        "local" | "" => Ok(AgentConfig::Local {
            working_dir: get_string_prop(node, "working-dir").map(PathBuf::from),
            artifact_dir: get_string_prop(node, "artifact-dir").map(PathBuf::from),
        }),
        _ => Err(ConfigError::InvalidValue {
            field: "agent type".to_string(),
            message: format!("unknown agent type: {}", kind),
        }),
    }
}

fn parse_credential(node: &KdlNode) -> ConfigResult<CredentialConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("credential name".to_string()))?;
    let provider = parse_provider(node, &format!("credential '{}'", name))?;
    let token_env = get_string_prop(node, "token-env")
        .ok_or_else(|| ConfigError::MissingField(format!("token-env for credential '{}'", name)))?;

    Ok(CredentialConfig {
        name,
        provider,
        token_env,
    })
}

fn parse_project(node: &KdlNode) -> ConfigResult<Project> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;

    let mut repo_config = None;
    let mut job_triggers = Vec::new();
    let mut command = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "repo" => {
                    let full_name = get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::MissingField(format!("repo for project '{}'", name))
                    })?;
                    if !REPO_NAME_REGEX.is_match(&full_name) {
                        return Err(ConfigError::InvalidValue {
                            field: format!("repo for project '{}'", name),
                            message: format!("expected owner/name, got {}", full_name),
                        });
                    }
                    let provider = parse_provider(child, &format!("project '{}'", name))?;
                    repo_config = Some(RepoConfig {
                        full_name,
                        provider,
                    });
                }
                "trigger" => {
                    job_triggers.push(parse_trigger(child, &name)?);
                }
                "command" => {
                    command = Some(parse_command(child, &name)?);
                }
                _ => {}
            }
        }
    }

    let repo_config = repo_config
        .ok_or_else(|| ConfigError::MissingField(format!("repo for project '{}'", name)))?;
    let command = command
        .ok_or_else(|| ConfigError::MissingField(format!("command for project '{}'", name)))?;

    Ok(Project {
        id: ProjectId::new(name),
        repo_config,
        job_triggers,
        command,
    })
}

fn parse_trigger(node: &KdlNode, project: &str) -> ConfigResult<JobTrigger> {
    let trigger_type = get_first_string_arg(node).unwrap_or_default();
    let branch = get_string_prop(node, "branch").ok_or_else(|| {
        ConfigError::MissingField(format!(
            "branch for {} trigger in project '{}'",
            trigger_type, project
        ))
    })?;

    match trigger_type.as_str() {
        "commit" | "push" => Ok(JobTrigger::Commit { branch }),
        "pull_request" | "pull-request" => Ok(JobTrigger::PullRequest { branch }),
        _ => Err(ConfigError::InvalidValue {
            field: "trigger type".to_string(),
            message: format!("unknown trigger type: {}", trigger_type),
        }),
    }
}

fn parse_command(node: &KdlNode, project: &str) -> ConfigResult<Command> {
    let bin = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("command for project '{}'", project)))?;
    let mut command = Command::new(bin);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "arg" => {
                    command.parameters.extend(get_all_string_args(child));
                }
                "env" => {
                    if let Some(grandchildren) = child.children() {
                        for gc in grandchildren.nodes() {
                            let key = gc.name().value().to_string();
                            if let Some(val) = get_first_string_arg(gc) {
                                command.env.insert(key, val);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(command)
}

fn parse_provider(node: &KdlNode, owner: &str) -> ConfigResult<GitProvider> {
    let provider = get_string_prop(node, "provider").unwrap_or_else(|| "github".to_string());
    provider
        .parse()
        .map_err(|message| ConfigError::InvalidValue {
            field: format!("{} provider", owner),
            message,
        })
}

/// Names of credentials that can serve no configured project, and projects
/// no credential can serve. Useful for `validate` output.
pub fn unmatched(config: &ServerConfig) -> (Vec<String>, Vec<String>) {
    let providers: HashSet<GitProvider> = config.credentials.iter().map(|c| c.provider).collect();
    let needed: HashSet<GitProvider> = config
        .projects
        .iter()
        .map(|p| p.repo_config.provider)
        .collect();

    let idle_credentials = config
        .credentials
        .iter()
        .filter(|c| !needed.contains(&c.provider))
        .map(|c| c.name.clone())
        .collect();
    let orphan_projects = config
        .projects
        .iter()
        .filter(|p| !providers.contains(&p.repo_config.provider))
        .map(|p| p.id.to_string())
        .collect();

    (idle_credentials, orphan_projects)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_integer_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    match node.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: name.to_string(),
                message: "expected a non-negative integer".to_string(),
            }),
    }
}
