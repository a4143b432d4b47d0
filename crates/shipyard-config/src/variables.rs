//! Variable interpolation for build commands.
//!
//! Supports variables like:
//! - `${git.sha}` - Full commit SHA being built
//! - `${git.short_sha}` - Short (7 char) commit SHA
//! - `${git.branch}` - Branch the trigger watches (empty for resumed builds)
//! - `${project.name}` - Project name
//! - `${project.repo}` - Full repository name
//! - `${build.id}` - Build ID
//! - `${build.number}` - Per-project build number
//! - `${build.trigger}` - What started the build
//! - `${env.VAR_NAME}` - Server environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${datetime}` - ISO datetime

use regex::Regex;
use shipyard_core::agent::Command;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub git: GitContext,
    pub project: ProjectContext,
    pub build: BuildContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by user
    pub custom: HashMap<String, String>,
}

/// Git context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
}

/// Project context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub name: String,
    pub repo: String,
}

/// Build context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub id: String,
    pub number: i64,
    pub trigger: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["git", "sha"] => Some(self.git.sha.clone()),
            ["git", "short_sha"] => Some(self.git.short_sha.clone()),
            ["git", "branch"] => Some(self.git.branch.clone()),

            ["project", "name"] => Some(self.project.name.clone()),
            ["project", "repo"] => Some(self.project.repo.clone()),

            ["build", "id"] => Some(self.build.id.clone()),
            ["build", "number"] => Some(self.build.number.to_string()),
            ["build", "trigger"] => Some(self.build.trigger.clone()),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            ["datetime"] => Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),

            // Single-part names check custom variables
            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left untouched.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate variables in a list of strings.
    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    /// Interpolate the values of a map.
    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    /// Expand a command template for one build.
    pub fn interpolate_command(&self, template: &Command) -> Command {
        Command {
            bin: self.interpolate(&template.bin),
            parameters: self.interpolate_vec(&template.parameters),
            env: self.interpolate_map(&template.env),
        }
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    /// Start from an existing context (e.g. one with the environment loaded).
    pub fn from_context(ctx: VariableContext) -> Self {
        Self { ctx }
    }

    pub fn with_git_sha(mut self, sha: impl Into<String>) -> Self {
        let sha = sha.into();
        self.ctx.git.short_sha = sha.chars().take(7).collect();
        self.ctx.git.sha = sha;
        self
    }

    pub fn with_git_branch(mut self, branch: impl Into<String>) -> Self {
        self.ctx.git.branch = branch.into();
        self
    }

    pub fn with_project(mut self, name: impl Into<String>, repo: impl Into<String>) -> Self {
        self.ctx.project.name = name.into();
        self.ctx.project.repo = repo.into();
        self
    }

    pub fn with_build(
        mut self,
        id: impl Into<String>,
        number: i64,
        trigger: impl Into<String>,
    ) -> Self {
        self.ctx.build.id = id.into();
        self.ctx.build.number = number;
        self.ctx.build.trigger = trigger.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
