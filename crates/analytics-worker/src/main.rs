//! # Analytics Worker
//!
//! Binary entry point for the worker process. Loads configuration,
//! connects to the queue and store backends, and runs the poll/process/
//! drain loop until a shutdown signal arrives.

use analytics_api::PrometheusMetrics;
use analytics_store::{RetentionPolicy, StoreConfig, StoreGateway};
use analytics_worker::{run_stats_reporter, WorkerConfig, WorkerLoop};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analytics_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init();

    info!("starting analytics worker");

    let store_config = match store_config_from_env() {
        Ok(config) => config,
        Err(message) => {
            error!(%message, "invalid store configuration");
            std::process::exit(1);
        }
    };

    let pool = match analytics_store::connect(&store_config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to connect to the store");
            std::process::exit(1);
        }
    };

    if let Err(e) = analytics_store::run_migrations(&pool).await {
        error!(error = %e, "failed to run store migrations");
        std::process::exit(1);
    }

    let metrics = match PrometheusMetrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            error!(error = %e, "failed to register metrics");
            std::process::exit(1);
        }
    };

    let store = Arc::new(StoreGateway::new(pool, RetentionPolicy::default(), metrics.clone()));
    let queue = match build_queue().await {
        Ok(queue) => queue,
        Err(message) => {
            error!(%message, "failed to initialize queue backend");
            std::process::exit(1);
        }
    };
    let worker_config = WorkerConfig::from_env();
    let worker = Arc::new(WorkerLoop::new(
        queue.clone(),
        store.clone(),
        worker_config.clone(),
        metrics,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reporter_handle = tokio::spawn(run_stats_reporter(
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

    let grace = worker_config.shutdown_grace;
    if tokio::time::timeout(grace, worker_handle).await.is_err() {
        error!("worker did not drain within the shutdown grace period");
    }
    let _ = reporter_handle.await;

    info!("worker shutdown complete");
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

fn store_config_from_env() -> Result<StoreConfig, String> {
    Ok(StoreConfig {
        host: std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: std::env::var("DB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5432),
        database: std::env::var("DB_NAME").map_err(|_| "DB_NAME is required".to_string())?,
        user: std::env::var("DB_USER").map_err(|_| "DB_USER is required".to_string())?,
        password: std::env::var("DB_PASSWORD").map_err(|_| "DB_PASSWORD is required".to_string())?,
        pool_size: std::env::var("DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        idle_timeout: std::time::Duration::from_secs(
            std::env::var("DB_IDLE_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
        ),
        statement_timeout: std::time::Duration::from_secs(
            std::env::var("DB_STATEMENT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        ),
    })
}

async fn build_queue() -> Result<Arc<dyn analytics_queue::DurableQueue>, String> {
    let max_queue_size = std::env::var("MAX_QUEUE_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10_000);

    // `REDIS_URL` selects the production backend; its absence means this
    // process is running in a dev/test deployment against the in-memory
    // store, the same fallback `analytics-service` uses at startup.
    match std::env::var("REDIS_URL") {
        Ok(url) => {
            let queue_key = std::env::var("QUEUE_KEY").unwrap_or_else(|_| "analytics:events".to_string());
            let store = analytics_queue::providers::redis::RedisStore::connect(&url, queue_key, max_queue_size)
                .await
                .map_err(|e| e.to_string())?;
            Ok(Arc::new(store))
        }
        Err(_) => Ok(Arc::new(analytics_queue::providers::memory::InMemoryStore::new(
            max_queue_size,
        ))),
    }
}
