//! # Analytics Service
//!
//! Binary entry point for the HTTP process (C1). Loads configuration,
//! connects to the store and queue backends, and serves the ingestion
//! endpoint, stats reader, and metrics surface from `analytics-api` until
//! a shutdown signal arrives.

use analytics_api::{start_server, AppConfig};
use analytics_service::{build_state, StartupError};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analytics_service=info,analytics_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid service configuration");
            std::process::exit(3);
        }
    };

    let state = match build_state(config).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to start analytics service");
            std::process::exit(exit_code(&e));
        }
    };

    if let Err(e) = start_server(state).await {
        error!(error = %e, "server failed");
        std::process::exit(1);
    }
}

fn exit_code(err: &StartupError) -> i32 {
    match err {
        StartupError::StoreConfig(_) => 10,
        StartupError::StoreConnect(_) => 11,
        StartupError::QueueConnect(_) => 12,
        StartupError::Metrics(_) => 13,
        StartupError::Service(_) => 14,
    }
}
