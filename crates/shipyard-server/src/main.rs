//! Shipyard CI server

use anyhow::Context;
use clap::Parser;
use shipyard_config::{StaticConfigService, load_server_config};
use shipyard_core::store::BuildStore;
use shipyard_db::{MemoryBuildStore, PgBuildStore, create_pool, run_migrations};
use shipyard_server::engine::{Engine, build_agent};
use shipyard_server::services::github::{DEFAULT_API_URL, GitHubProviders};
use shipyard_server::{AppState, routes};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shipyard-server")]
#[command(about = "Shipyard CI server", long_about = None)]
#[command(version)]
struct Args {
    /// Server configuration file
    #[arg(short, long, env = "SHIPYARD_CONFIG", default_value = "shipyard.kdl")]
    config: PathBuf,

    /// PostgreSQL URL; builds are kept in memory when absent
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Address of the status HTTP surface (overrides the config file)
    #[arg(long, env = "SHIPYARD_LISTEN")]
    listen: Option<String>,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    github_api_url: String,

    /// Do not start worker loops
    #[arg(long, env = "SHIPYARD_SKIP_WORKERS")]
    skip_workers: bool,

    /// Do not run the startup reconciliation pass
    #[arg(long, env = "SHIPYARD_SKIP_RECONCILIATION")]
    skip_reconciliation: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let server = load_server_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let config = StaticConfigService::from_config(&server, |name| std::env::var(name).ok())?;
    info!(
        projects = server.projects.len(),
        credentials = server.credentials.len(),
        "Configuration loaded"
    );

    let (store, pool) = match &args.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            let store: Arc<dyn BuildStore> = Arc::new(PgBuildStore::new(pool.clone()));
            (store, Some(pool))
        }
        None => {
            warn!("No database configured, builds are kept in memory");
            let store: Arc<dyn BuildStore> = Arc::new(MemoryBuildStore::new());
            (store, None)
        }
    };

    let agent = build_agent(&server.agent)?;
    let providers = Arc::new(GitHubProviders::new(args.github_api_url.clone()));
    let engine = Engine::new(&server, config, store, agent, providers);

    let registered = engine.register_workers();
    info!(registered, "Worker loops registered");

    if args.skip_reconciliation {
        info!("Reconciliation skipped");
    } else if let Some(report) = engine.reconcile().await {
        info!(
            resumed = report.resumed,
            reconciled = report.reconciled,
            "Reconciliation done"
        );
    }

    if args.skip_workers {
        info!("Worker loops not started");
    } else {
        engine.start_workers();
    }

    let app = routes::router(AppState::new(&engine, pool)).layer(TraceLayer::new_for_http());

    let addr = args.listen.unwrap_or(server.listen);
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await?;

    engine.shutdown();
    Ok(())
}
