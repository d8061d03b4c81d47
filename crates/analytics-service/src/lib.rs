//! # Analytics HTTP Service
//!
//! Thin wiring for the HTTP process binary (C1): loads [`AppConfig`] from
//! the environment, connects the store and queue backends, and starts
//! `analytics_api::start_server`. Everything behavioral — the router, the
//! error taxonomy, the metrics series — lives in `analytics-api`; this
//! crate only owns backend selection and the process lifecycle.

use analytics_api::{AppConfig, AppState, PrometheusMetrics};
use analytics_queue::providers::{memory::InMemoryStore, redis::RedisStore};
use analytics_queue::{DurableQueue, RateLimiter, StatsCache};
use analytics_store::{RetentionPolicy, StoreConfig, StoreGateway};
use std::sync::Arc;
use thiserror::Error;

/// Failures that can prevent the service from starting, before any request
/// is ever served. Distinct from `analytics_api::ServiceError`, which this
/// type wraps once a router does exist to bind and serve.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid store configuration: {0}")]
    StoreConfig(String),

    #[error("failed to connect to the store: {0}")]
    StoreConnect(#[from] analytics_store::StoreError),

    #[error("failed to initialize queue backend: {0}")]
    QueueConnect(String),

    #[error("failed to initialize metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Service(#[from] analytics_api::ServiceError),
}

/// Builds the `StoreConfig` analytics-store's connection pool needs from
/// `DB_*` environment variables, mirroring `analytics-worker`'s loader.
pub fn store_config_from_env() -> Result<StoreConfig, StartupError> {
    Ok(StoreConfig {
        host: std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: std::env::var("DB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5432),
        database: std::env::var("DB_NAME")
            .map_err(|_| StartupError::StoreConfig("DB_NAME is required".to_string()))?,
        user: std::env::var("DB_USER")
            .map_err(|_| StartupError::StoreConfig("DB_USER is required".to_string()))?,
        password: std::env::var("DB_PASSWORD")
            .map_err(|_| StartupError::StoreConfig("DB_PASSWORD is required".to_string()))?,
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

/// A single backing store doubles as the `DurableQueue`, `RateLimiter`, and
/// `StatsCache` implementations. This
/// returns one concrete `Arc` coerced three ways so `AppState` can hold
/// each trait object independently.
pub async fn build_queue_backend(
    config: &AppConfig,
) -> Result<(Arc<dyn DurableQueue>, Arc<dyn RateLimiter>, Arc<dyn StatsCache>), StartupError> {
    match std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()) {
        Some(url) => {
            let store = RedisStore::connect(&url, config.queue_key.clone(), config.max_queue_size)
                .await
                .map_err(|e| StartupError::QueueConnect(e.to_string()))?;
            let store = Arc::new(store);
            Ok((store.clone(), store.clone(), store))
        }
        None => {
            if config.mode.is_production() {
                return Err(StartupError::QueueConnect(
                    "REDIS_URL is required in production; refusing to fall back to the in-memory queue".to_string(),
                ));
            }
            let store = Arc::new(InMemoryStore::new(config.max_queue_size));
            Ok((store.clone(), store.clone(), store))
        }
    }
}

/// Assembles [`AppState`] from a freshly loaded [`AppConfig`]: connects the
/// store, runs migrations, selects the queue backend, and registers the
/// Prometheus metrics collector. Split out of `main` so integration tests
/// can build the same state against a test database.
pub async fn build_state(config: AppConfig) -> Result<AppState, StartupError> {
    let store_config = store_config_from_env()?;
    let pool = analytics_store::connect(&store_config).await?;
    analytics_store::run_migrations(&pool).await?;
    let metrics = PrometheusMetrics::new()?;
    let store = Arc::new(StoreGateway::new(pool, RetentionPolicy::default(), metrics.clone()));

    let (queue, rate_limiter, cache) = build_queue_backend(&config).await?;

    Ok(AppState::new(
        Arc::new(config),
        queue,
        rate_limiter,
        cache,
        store,
        metrics,
    ))
}
