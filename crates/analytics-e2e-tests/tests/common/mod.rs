//! Harness for black-box tests against a running `analytics-service`
//! process.
//!
//! Container orchestration is explicitly out of scope, so unlike a typical Docker-Compose-backed e2e suite this
//! one never starts the process itself: it expects `ANALYTICS_E2E_BASE_URL`
//! to point at an already-running instance and skips every test when that
//! variable is unset, the same accommodation the cross-crate suite makes for
//! a missing `DATABASE_URL`.

use std::time::Duration;

/// Reads `ANALYTICS_E2E_BASE_URL`, or returns `None` so callers can skip.
pub fn base_url() -> Option<String> {
    std::env::var("ANALYTICS_E2E_BASE_URL")
        .ok()
        .filter(|v| !v.is_empty())
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("failed to build HTTP client")
}

/// Polls `/v1/health` until it returns 200 or the attempt budget is spent.
/// Useful right after a fresh deploy; a no-op if the service is already up.
pub async fn wait_for_health(base_url: &str) -> bool {
    let client = http_client();
    let url = format!("{base_url}/v1/health");
    for _ in 0..10 {
        if let Ok(response) = client.get(&url).send().await {
            if response.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}

pub fn minimal_event_batch() -> serde_json::Value {
    serde_json::json!({ "events": [{
        "version": "1.0.0",
        "tool": "get_forecast",
        "status": "success",
        "timestamp_hour": current_hour(),
        "analytics_level": "minimal",
    }]})
}

pub fn standard_error_event(tool: &str, version: &str) -> serde_json::Value {
    serde_json::json!({
        "version": version,
        "tool": tool,
        "status": "error",
        "timestamp_hour": current_hour(),
        "analytics_level": "standard",
        "response_time_ms": 5000,
        "service": "noaa",
        "cache_hit": false,
        "retry_count": 1,
        "country": "US",
        "error_type": "TIMEOUT",
    })
}

/// The current hour, truncated to satisfy the hour-alignment rule every
/// event must pass.
pub fn current_hour() -> String {
    use chrono::{Timelike, Utc};
    let now = Utc::now();
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
