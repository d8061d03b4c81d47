//! # Analytics CLI
//!
//! Operator entry point: `start --mode server|worker`, `status`, and
//! `config show`, using a `clap` derive + subcommand style. Each subcommand
//! drives the same `analytics-service`/
//! `analytics-worker` library functions the dedicated process binaries
//! use, so `analytics-cli start --mode server` is equivalent to running
//! the `analytics-service` binary directly.

use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Analytics platform operator CLI.
#[derive(Parser)]
#[command(name = "analytics-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operate the anonymous analytics collection service")]
pub struct Cli {
    /// Logging level, overriding `LOG_LEVEL`.
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a process in the foreground: the HTTP ingestion/stats service
    /// or the batching worker loop.
    Start {
        #[arg(short, long, value_enum, default_value = "server")]
        mode: ServiceMode,
    },

    /// Report whether the configured store and queue backends are
    /// reachable, without starting a long-running process.
    Status,

    /// Print the configuration that would be loaded from the current
    /// environment.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the resolved `AppConfig`, redacting secrets.
    Show,
}

#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServiceMode {
    /// The HTTP ingestion endpoint, stats reader, and metrics surface (C1).
    Server,
    /// The poll/batch/insert/aggregate worker loop (C6).
    Worker,
}

/// Errors `run_cli` can return, each mapped to a distinct process exit code
/// in `main`.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("server failed: {0}")]
    Server(#[from] analytics_api::ServiceError),

    #[error("startup failed: {0}")]
    Startup(#[from] analytics_service::StartupError),

    #[error("store connection failed: {0}")]
    Store(#[from] analytics_store::StoreError),

    #[error("queue connection failed: {0}")]
    Queue(String),

    #[error("failed to initialize metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Parses arguments and dispatches to the requested subcommand.
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start { mode } => run_start(mode).await,
        Commands::Status => run_status().await,
        Commands::Config { action } => run_config(action).await,
    }
}

async fn run_start(mode: ServiceMode) -> Result<(), CliError> {
    match mode {
        ServiceMode::Server => {
            let config = analytics_api::AppConfig::from_env()
                .map_err(|e| CliError::Configuration(e.to_string()))?;
            info!(host = %config.host, port = config.port, "starting server");
            let state = analytics_service::build_state(config).await?;
            analytics_api::start_server(state).await?;
            Ok(())
        }
        ServiceMode::Worker => {
            let store_config = analytics_service::store_config_from_env()?;
            let pool = analytics_store::connect(&store_config).await?;
            analytics_store::run_migrations(&pool).await?;
            let metrics = analytics_api::PrometheusMetrics::new()?;
            let store = Arc::new(analytics_store::StoreGateway::new(
                pool,
                analytics_store::RetentionPolicy::default(),
                metrics.clone(),
            ));

            let max_queue_size = std::env::var("MAX_QUEUE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000);
            let queue = build_worker_queue(max_queue_size).await?;

            let worker_config = analytics_worker::WorkerConfig::from_env();
            let worker = Arc::new(analytics_worker::WorkerLoop::new(
                queue.clone(),
                store.clone(),
                worker_config.clone(),
                metrics,
            ));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let reporter = tokio::spawn(analytics_worker::run_stats_reporter(
                worker.stats(),
                queue,
                store,
                worker_config.stats_report_interval,
                shutdown_rx.clone(),
            ));
            let worker_handle = {
                let worker = worker.clone();
                tokio::spawn(async move { worker.run(shutdown_rx).await })
            };

            wait_for_shutdown_signal().await;
            info!("shutdown signal received, draining worker");
            let _ = shutdown_tx.send(true);
            if tokio::time::timeout(worker_config.shutdown_grace, worker_handle)
                .await
                .is_err()
            {
                error!("worker did not drain within the shutdown grace period");
            }
            let _ = reporter.await;
            Ok(())
        }
    }
}

async fn build_worker_queue(
    max_queue_size: u64,
) -> Result<Arc<dyn analytics_queue::DurableQueue>, CliError> {
    match std::env::var("REDIS_URL") {
        Ok(url) => {
            let queue_key = std::env::var("QUEUE_KEY").unwrap_or_else(|_| "analytics:events".to_string());
            let store = analytics_queue::providers::redis::RedisStore::connect(&url, queue_key, max_queue_size)
                .await
                .map_err(|e| CliError::Queue(e.to_string()))?;
            Ok(Arc::new(store))
        }
        Err(_) => Ok(Arc::new(analytics_queue::providers::memory::InMemoryStore::new(
            max_queue_size,
        ))),
    }
}

/// Checks store and queue connectivity without starting a server, printing
/// a human-readable summary and returning a non-zero exit only via the
/// caller inspecting the printed status: a quick operator sanity check.
async fn run_status() -> Result<(), CliError> {
    let store_config = analytics_service::store_config_from_env()?;
    match analytics_store::connect(&store_config).await {
        Ok(pool) => match analytics_store::StoreGateway::new(
            pool,
            analytics_store::RetentionPolicy::default(),
            Arc::new(analytics_core::monitoring::NoOpMetricsCollector),
        )
        .ping()
        .await
        {
            Ok(()) => println!("store: ok"),
            Err(e) => println!("store: unreachable ({e})"),
        },
        Err(e) => println!("store: unreachable ({e})"),
    }

    let max_queue_size = std::env::var("MAX_QUEUE_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10_000);
    match build_worker_queue(max_queue_size).await {
        Ok(queue) => match queue.depth().await {
            Ok(depth) => println!("queue: ok (depth {depth})"),
            Err(e) => println!("queue: unreachable ({e})"),
        },
        Err(e) => println!("queue: unreachable ({e})"),
    }

    Ok(())
}

async fn run_config(action: ConfigCommands) -> Result<(), CliError> {
    match action {
        ConfigCommands::Show => {
            let config = analytics_api::AppConfig::from_env()
                .map_err(|e| CliError::Configuration(e.to_string()))?;
            println!("{config:#?}");
            Ok(())
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
