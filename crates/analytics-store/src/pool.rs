//! Connection pool setup.

use crate::error::StoreError;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;

/// Pool and per-statement tuning, assembled once by `analytics-service`'s
/// config loader from the `DB_*` environment variables.
#[derive(Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
    pub idle_timeout: Duration,
    /// Applied to every connection via `SET statement_timeout` so every
    /// query runs under a configured statement timeout (default 10s).
    pub statement_timeout: Duration,
}

/// Redacts `password` so a stray `tracing::debug!("{:?}", config)` never
/// leaks a credential.
impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[redacted]")
            .field("pool_size", &self.pool_size)
            .field("idle_timeout", &self.idle_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

impl StoreConfig {
    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

/// Builds the bounded connection pool and verifies connectivity with a
/// single round trip before returning.
pub async fn connect(config: &StoreConfig) -> Result<PgPool, StoreError> {
    let statement_timeout_ms = config.statement_timeout.as_millis();
    let options = config.connect_options();

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .idle_timeout(config.idle_timeout)
        .after_connect(move |conn, _meta| {
            let statement = format!("SET statement_timeout = {statement_timeout_ms}");
            Box::pin(async move {
                sqlx::Executor::execute(conn, statement.as_str()).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

/// Runs the embedded schema migrations. In a TimescaleDB deployment, the
/// operator additionally runs `SELECT create_hypertable(...)` for `events`,
/// `hourly_aggregations`, and `daily_aggregations` against `timestamp_hour`
/// / `hour` / `date` respectively — that step is an operational concern
/// (deliberately out of scope here) layered on top of the plain
/// tables this migration creates.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::MigrationFailed { message: e.to_string() })
}
