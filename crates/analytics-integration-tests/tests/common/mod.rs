//! Shared fixtures for the cross-crate integration suite.
//!
//! Most of this crate's tests exercise `analytics-core` and
//! `analytics-queue` directly against the in-memory backend, which needs no
//! external service. Tests that build a full `analytics_api::AppState` need
//! a real `StoreGateway`, since it wraps a live `sqlx::PgPool` rather than a
//! trait object — those tests call [`connect_store`] and return early when
//! no `DATABASE_URL` is configured, the same accommodation
//! `analytics-worker`'s own unit tests make for the same reason.

use analytics_api::AppConfig;
use analytics_core::monitoring::NoOpMetricsCollector;
use analytics_core::Mode;
use analytics_store::{RetentionPolicy, StoreGateway};
use std::sync::Arc;
use std::time::Duration;

/// Connects using the `DB_*` environment variables (the same loader
/// `analytics-service::main` uses) and runs migrations, or returns `None`
/// if `DB_NAME`/`DB_USER` aren't set. Call this first in any test that
/// needs a real store and return immediately on `None`:
///
/// ```ignore
/// let Some(store) = common::connect_store().await else { return };
/// ```
pub async fn connect_store() -> Option<Arc<StoreGateway>> {
    let config = analytics_service::store_config_from_env().ok()?;
    let pool = analytics_store::connect(&config).await.ok()?;
    analytics_store::run_migrations(&pool).await.ok()?;
    Some(Arc::new(StoreGateway::new(
        pool,
        RetentionPolicy::default(),
        Arc::new(NoOpMetricsCollector),
    )))
}

/// A small, deterministic `AppConfig` for router tests: short TTLs, tight
/// rate limits, and a small queue so capacity/rate-limit scenarios don't need thousands of requests to exercise.
pub fn test_config(max_queue_size: u64) -> AppConfig {
    AppConfig {
        mode: Mode::Test,
        host: "127.0.0.1".to_string(),
        port: 0,
        log_level: "info".to_string(),
        queue_key: "analytics:events:test".to_string(),
        max_queue_size,
        body_limit_bytes: 100 * 1024,
        rate_limit_per_minute: 5,
        rate_limit_burst: 0,
        max_batch_size: 100,
        cache_ttl: Duration::from_secs(300),
        cache_enabled: true,
        trust_proxy: false,
        cors_origin: "*".to_string(),
        enable_metrics: true,
        shutdown_grace: Duration::from_secs(5),
    }
}

/// A minimal, valid event batch body for `POST /v1/events`.
pub fn minimal_event_batch() -> serde_json::Value {
    serde_json::json!({ "events": [{
        "version": "1.0.0",
        "tool": "get_forecast",
        "status": "success",
        "timestamp_hour": "2025-11-11T14:00:00Z",
        "analytics_level": "minimal",
    }]})
}
