//! scoreapp - live race timing server
//!
//! Startup:
//! 1. Load `scoreapp.toml` (or defaults) and apply env/CLI overrides
//! 2. Open the sled record store
//! 3. Spawn the hub and restore the running race
//! 4. Serve HTTP/websockets (and the simulator with `--sim`) until Ctrl+C

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use scoreapp::api::{create_app, ApiKeys, AppState};
use scoreapp::config::{defaults, AppConfig};
use scoreapp::storage::{RecordStore, SledStore};
use scoreapp::{hub, simulator, Classifier, RaceGuard};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "scoreapp")]
#[command(about = "Live race timing: barrier crossings to dashboards in real time")]
#[command(version)]
struct CliArgs {
    /// Override the server address (default: "0.0.0.0:4110")
    #[arg(short, long, value_name = "HOST:PORT")]
    addr: Option<String>,

    /// Listen only on the loopback interface (127.0.0.1)
    #[arg(long, conflicts_with = "addr")]
    loopback: bool,

    /// File with JSON-encoded API keys
    #[arg(long, value_name = "FILE")]
    keys: Option<PathBuf>,

    /// Configuration file (default: $SCOREAPP_CONFIG, then ./scoreapp.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Simulate barriers 1 and 2
    #[arg(long)]
    sim: bool,
}

impl CliArgs {
    fn load_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => AppConfig::load(),
        };

        if let Ok(addr) = std::env::var("SCOREAPP_SERVER_ADDR") {
            config.server.addr = addr;
        }
        if self.loopback {
            config.server.addr = defaults::LOOPBACK_ADDR.to_string();
        }
        if let Some(addr) = &self.addr {
            config.server.addr = addr.clone();
        }
        Ok(config)
    }
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Simulator,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Simulator => write!(f, "Simulator"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the server drain its connections
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!("Supervisor: task {} stopped", task_name);
        }
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = args.load_config()?;

    let keys = match &args.keys {
        Some(path) => ApiKeys::load(path)?,
        None => ApiKeys::default(),
    };
    if keys.is_enabled() {
        info!(keys = keys.len(), "API key authentication enabled");
    }

    let store: Arc<dyn RecordStore> = Arc::new(
        SledStore::open(&config.storage.path)
            .with_context(|| format!("Failed to open store at {}", config.storage.path.display()))?,
    );
    info!(
        backend = store.backend_name(),
        path = %config.storage.path.display(),
        "Record store opened"
    );

    let cancel_token = CancellationToken::new();
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    let races = Arc::new(RaceGuard::new(
        Arc::clone(&store),
        hub::spawn(defaults::HUB_CHANNEL_CAPACITY),
        Classifier::new(config.races.debounce()),
    ));
    races.restore().await.context("Failed to restore running race")?;

    if args.sim {
        info!("Barrier simulator enabled");
        let races = Arc::clone(&races);
        let token = cancel_token.clone();
        task_set.spawn(async move {
            simulator::run(races, token).await;
            Ok(TaskName::Simulator)
        });
    }

    let addr = config.server.addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    let app = create_app(AppState::new(races, keys, config));
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());

    // Graceful shutdown via Ctrl+C
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    run_supervisor(&mut task_set, cancel_token).await?;

    info!("scoreapp shutdown complete");
    Ok(())
}
