//! Worker tuning knobs, loaded from the `WORKER_*` / `SHUTDOWN_GRACE_MS`
//! environment variables.

use std::time::Duration;

/// Everything the worker loop needs besides its `DurableQueue` and
/// `StoreGateway` handles.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `WORKER_BATCH_SIZE`, default 50.
    pub batch_size: usize,
    /// `WORKER_POLL_INTERVAL_MS`, default 1s: sleep between empty polls.
    pub poll_interval: Duration,
    /// Flat delay between DB-insert retries, default 5s.
    pub insert_retry_backoff: Duration,
    /// `SHUTDOWN_GRACE_MS`, default 30s: time an in-flight batch is given
    /// to finish normally once shutdown begins.
    pub shutdown_grace: Duration,
    /// Interval for the periodic `{inFlight, totalProcessed, errorCount,
    /// queueDepth}` stats log, fixed at 60s.
    pub stats_report_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(1),
            insert_retry_backoff: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
            stats_report_interval: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Reads overrides from the environment, falling back to the documented
    /// defaults. Unlike `analytics-api`'s config loader this never aborts
    /// startup — every worker knob has a safe default, so a malformed
    /// override is logged and ignored rather than treated as fatal.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_usize("WORKER_BATCH_SIZE", defaults.batch_size),
            poll_interval: env_millis("WORKER_POLL_INTERVAL_MS", defaults.poll_interval),
            insert_retry_backoff: defaults.insert_retry_backoff,
            shutdown_grace: env_millis("SHUTDOWN_GRACE_MS", defaults.shutdown_grace),
            stats_report_interval: defaults.stats_report_interval,
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.insert_retry_backoff, Duration::from_secs(5));
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));
        assert_eq!(config.stats_report_interval, Duration::from_secs(60));
    }

    #[test]
    fn malformed_override_falls_back_to_default() {
        assert_eq!(env_usize("ANALYTICS_WORKER_TEST_MISSING_VAR", 50), 50);
    }
}
