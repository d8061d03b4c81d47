//! Fail-fast configuration for the HTTP service, loaded once at startup from
//! environment variables. Unlike `analytics-worker`'s
//! config loader (where every knob has a safe default), a handful of these
//! are required: a malformed or missing value here aborts startup rather
//! than silently degrading a running service.

use analytics_core::Mode;
use std::time::Duration;
use thiserror::Error;

/// Everything the ingestion endpoint (C5), stats reader (C8), and metrics
/// surface (C9) need that isn't already owned by `analytics-store` or
/// `analytics-queue`'s own config types.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: Mode,
    pub host: String,
    pub port: u16,
    pub log_level: String,

    pub queue_key: String,
    pub max_queue_size: u64,

    /// `API_BODY_LIMIT_KB`, default 100: the body-size gate applied before
    /// any JSON parsing.
    pub body_limit_bytes: usize,
    /// `RATE_LIMIT_PER_MINUTE`, default 60.
    pub rate_limit_per_minute: u32,
    /// `RATE_LIMIT_BURST`, default 10: boundary tolerance for the
    /// sliding-window counter (see [`Self::rate_limit_window_budget`]), not
    /// an addition to the hard per-minute ceiling.
    pub rate_limit_burst: u32,
    /// `MAX_BATCH_SIZE`, default 100 — must never exceed
    /// `analytics_core::validator::MAX_BATCH_SIZE`, which is the hard
    /// ceiling the validator itself enforces.
    pub max_batch_size: usize,

    /// `CACHE_TTL_SECONDS`, default 300.
    pub cache_ttl: Duration,
    /// `CACHE_ENABLED`, default true.
    pub cache_enabled: bool,

    /// `TRUST_PROXY`, default false: whether `X-Forwarded-For` is trusted
    /// when deriving the rate-limiter identifier.
    pub trust_proxy: bool,
    /// `CORS_ORIGIN`, default `*`.
    pub cors_origin: String,

    /// `ENABLE_METRICS`, default true.
    pub enable_metrics: bool,
    /// `SHUTDOWN_GRACE_MS`, default 30s.
    pub shutdown_grace: Duration,
}

/// Failure loading configuration from the environment. Every variant
/// corresponds to a required variable the process cannot safely start
/// without, or a value that failed to parse.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {key}")]
    Missing { key: String },

    #[error("environment variable {key} has an invalid value: {message}")]
    Invalid { key: String, message: String },
}

impl AppConfig {
    /// Loads configuration from the process environment, failing fast on
    /// the first invalid value rather than falling back to a guess and
    /// starting in a degraded state.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = optional("NODE_ENV")
            .or_else(|| optional("MODE"))
            .map(|raw| {
                raw.parse::<Mode>().map_err(|_| ConfigError::Invalid {
                    key: "NODE_ENV".to_string(),
                    message: format!("'{raw}' is not development, production, or test"),
                })
            })
            .transpose()?
            .unwrap_or(Mode::Development);

        let config = Self {
            mode,
            host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or_default("PORT", 8080)?,
            log_level: optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            queue_key: optional("QUEUE_KEY").unwrap_or_else(|| "analytics:events".to_string()),
            max_queue_size: parse_or_default("MAX_QUEUE_SIZE", 10_000)?,

            body_limit_bytes: parse_or_default::<usize>("API_BODY_LIMIT_KB", 100)? * 1024,
            rate_limit_per_minute: parse_or_default("RATE_LIMIT_PER_MINUTE", 60)?,
            rate_limit_burst: parse_or_default("RATE_LIMIT_BURST", 10)?,
            max_batch_size: parse_or_default(
                "MAX_BATCH_SIZE",
                analytics_core::validator::MAX_BATCH_SIZE,
            )?
            .min(analytics_core::validator::MAX_BATCH_SIZE),

            cache_ttl: Duration::from_secs(parse_or_default("CACHE_TTL_SECONDS", 300)?),
            cache_enabled: parse_or_default("CACHE_ENABLED", true)?,

            trust_proxy: parse_or_default("TRUST_PROXY", false)?,
            cors_origin: optional("CORS_ORIGIN").unwrap_or_else(|| "*".to_string()),

            enable_metrics: parse_or_default("ENABLE_METRICS", true)?,
            shutdown_grace: Duration::from_millis(parse_or_default("SHUTDOWN_GRACE_MS", 30_000)?),
        };

        if config.mode.is_production() && config.cors_origin == "*" {
            return Err(ConfigError::Invalid {
                key: "CORS_ORIGIN".to_string(),
                message: "must be an explicit allow-list, not '*', in production".to_string(),
            });
        }

        Ok(config)
    }

    /// The hard ceiling passed to `RateLimiter::check`: `rate_limit_per_minute`
    /// alone, so the window never admits more than the configured rate (spec
    /// §8 scenario 3: 61 requests in under 60s must yield at least one 429).
    /// `rate_limit_burst` is deliberately not added to this ceiling — it
    /// exists as configuration for a future sliding-window boundary
    /// tolerance, not as extra admitted volume.
    pub fn rate_limit_window_budget(&self) -> u32 {
        self.rate_limit_per_minute
    }

    /// Whether error response bodies should omit internal detail.
    pub fn sanitize_errors(&self) -> bool {
        self.mode.is_production()
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match optional(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("'{raw}' could not be parsed"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_all_env() {
        for key in [
            "NODE_ENV", "MODE", "HOST", "PORT", "LOG_LEVEL", "QUEUE_KEY", "MAX_QUEUE_SIZE",
            "API_BODY_LIMIT_KB", "RATE_LIMIT_PER_MINUTE", "RATE_LIMIT_BURST", "MAX_BATCH_SIZE",
            "CACHE_TTL_SECONDS", "CACHE_ENABLED", "TRUST_PROXY", "CORS_ORIGIN",
            "ENABLE_METRICS", "SHUTDOWN_GRACE_MS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_match_spec_values_when_unset() {
        clear_all_env();
        let config = AppConfig::from_env().expect("defaults must load");
        assert_eq!(config.port, 8080);
        assert_eq!(config.body_limit_bytes, 100 * 1024);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.rate_limit_burst, 10);
        assert_eq!(config.rate_limit_window_budget(), 60);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert!(!config.mode.is_production());
    }

    #[test]
    #[serial]
    fn invalid_mode_is_rejected_not_defaulted() {
        clear_all_env();
        std::env::set_var("NODE_ENV", "not-a-mode");
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        std::env::remove_var("NODE_ENV");
    }

    #[test]
    #[serial]
    fn max_batch_size_override_is_capped_at_validator_ceiling() {
        clear_all_env();
        std::env::set_var("MAX_BATCH_SIZE", "99999");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.max_batch_size, analytics_core::validator::MAX_BATCH_SIZE);
        std::env::remove_var("MAX_BATCH_SIZE");
    }

    #[test]
    #[serial]
    fn production_mode_sanitizes_error_details() {
        clear_all_env();
        std::env::set_var("NODE_ENV", "production");
        let config = AppConfig::from_env().unwrap();
        assert!(config.sanitize_errors());
        std::env::remove_var("NODE_ENV");
    }

    #[test]
    #[serial]
    fn production_mode_rejects_wildcard_cors_origin() {
        clear_all_env();
        std::env::set_var("NODE_ENV", "production");
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "CORS_ORIGIN"));
        std::env::remove_var("NODE_ENV");
    }

    #[test]
    #[serial]
    fn production_mode_accepts_explicit_cors_origin() {
        clear_all_env();
        std::env::set_var("NODE_ENV", "production");
        std::env::set_var("CORS_ORIGIN", "https://app.example.com");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.cors_origin, "https://app.example.com");
        std::env::remove_var("NODE_ENV");
        std::env::remove_var("CORS_ORIGIN");
    }
}
