//! Shipyard CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Shipyard CI CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "SHIPYARD_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a server configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "shipyard.kdl")]
        path: String,
    },
    /// Build one commit of a configured project locally
    Run {
        /// Project name
        project: String,
        /// Commit SHA exposed to the command as ${git.sha}
        sha: String,
        /// Branch exposed to the command as ${git.branch}
        #[arg(long)]
        branch: Option<String>,
        /// Path to the configuration file
        #[arg(short, long, env = "SHIPYARD_CONFIG", default_value = "shipyard.kdl")]
        config: String,
    },
    /// Inspect active build runners
    Runners {
        #[command(subcommand)]
        command: RunnerCommands,
    },
    /// List worker loops
    Workers,
    /// Inspect stored builds
    Builds {
        #[command(subcommand)]
        command: BuildCommands,
    },
}

#[derive(Subcommand)]
enum RunnerCommands {
    /// List active runners
    List,
    /// Show the runner for a commit
    Show { project: String, sha: String },
    /// Abort the runner for a commit
    Abort { project: String, sha: String },
}

#[derive(Subcommand)]
enum BuildCommands {
    /// Show a build
    Show {
        /// Build ID
        id: String,
    },
    /// Print the logs of a build
    Logs {
        /// Build ID
        id: String,
    },
    /// List builds of a commit
    History { project: String, sha: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Run {
            project,
            sha,
            branch,
            config,
        } => {
            commands::run::run_local(&config, &project, &sha, branch).await?;
        }
        Commands::Runners { command } => {
            let api = commands::api::ApiClient::new(&cli.api_url)?;
            match command {
                RunnerCommands::List => commands::runners::list(&api).await?,
                RunnerCommands::Show { project, sha } => {
                    commands::runners::show(&api, &project, &sha).await?
                }
                RunnerCommands::Abort { project, sha } => {
                    commands::runners::abort(&api, &project, &sha).await?
                }
            }
        }
        Commands::Workers => {
            let api = commands::api::ApiClient::new(&cli.api_url)?;
            commands::workers(&api).await?;
        }
        Commands::Builds { command } => {
            let api = commands::api::ApiClient::new(&cli.api_url)?;
            match command {
                BuildCommands::Show { id } => commands::builds::show(&api, &id).await?,
                BuildCommands::Logs { id } => commands::builds::logs(&api, &id).await?,
                BuildCommands::History { project, sha } => {
                    commands::builds::history(&api, &project, &sha).await?
                }
            }
        }
    }

    Ok(())
}
