//! # Analytics Core
//!
//! Domain logic for the anonymous analytics collection service: the event
//! schema, the PII sweep, the batch validator, and the pure aggregation
//! functions that turn a batch of events into hourly/daily/error rollups.
//!
//! ## Architecture
//!
//! This crate has zero infrastructure dependencies. It depends on nothing
//! that talks to a network or a disk: no database pool, no queue client, no
//! HTTP types. Everything here is pure and deterministic, which is what lets
//! the validator and aggregator be tested without any running services.
//! Infrastructure crates (`analytics-queue`, `analytics-store`,
//! `analytics-api`) depend on this crate, never the reverse.
//!
//! ## Usage
//!
//! ```rust
//! use analytics_core::{EventId, Timestamp};
//!
//! let id = EventId::new();
//! let now = Timestamp::now();
//! assert!(now.as_datetime().timestamp() > 0);
//! let _ = id.to_string();
//! ```

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use ulid::Ulid;
pub use uuid::Uuid;

/// Standard result type for analytics-core operations.
pub type CoreResult<T> = Result<T, AnalyticsError>;

// ============================================================================
// Domain identifier types
// ============================================================================

/// Monotonically-sortable identifier assigned to a raw event record when the
/// worker persists it. Not part of the wire format; generated server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Opaque per-client session identifier carried by `detailed`-level events.
/// An opaque 16-character hash, validated for length only and never
/// interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdHash(String);

impl SessionIdHash {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.len() != 16 {
            return Err(ValidationError::InvalidFormat {
                field: "session_id".to_string(),
                message: "must be exactly 16 characters".to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for tracing a single request across the ingestion handler,
/// worker logs, and error responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

// ============================================================================
// Time types
// ============================================================================

/// UTC timestamp wrapper used throughout the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    pub fn add_seconds(&self, seconds: u64) -> Self {
        Self(self.0 + chrono::Duration::seconds(seconds as i64))
    }

    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn duration_since(&self, other: Self) -> Duration {
        self.0
            .signed_duration_since(other.0)
            .to_std()
            .unwrap_or_default()
    }

    /// True iff minute, second, and nanosecond components are all zero —
    /// the hour-alignment invariant events are required to satisfy.
    pub fn is_hour_aligned(&self) -> bool {
        self.0.minute() == 0 && self.0.second() == 0 && self.0.nanosecond() == 0
    }

    /// Truncate to the start of the containing hour, used to derive the
    /// `bucket_hour` grouping key in the aggregator.
    pub fn truncated_to_hour(&self) -> Self {
        let dt = self
            .0
            .date_naive()
            .and_hms_opt(self.0.hour(), 0, 0)
            .expect("valid hour component")
            .and_utc();
        Self(dt)
    }

    /// The calendar date (UTC) this timestamp falls on, used to derive the
    /// `bucket_date` grouping key.
    pub fn date_key(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    /// The hour bucket key in a form suitable for a natural-key UPSERT.
    pub fn hour_key(&self) -> String {
        self.0.format("%Y-%m-%dT%H:00:00Z").to_string()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Process configuration enums
// ============================================================================

/// Deployment mode. Gates config defaults (e.g. log format, CORS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Development,
    Production,
    Test,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Mode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            _ => Err(ParseError::InvalidFormat {
                expected: "development, production, or test".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// Logging level configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fatal" => Ok(Self::Fatal),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(ParseError::InvalidFormat {
                expected: "fatal, error, warn, info, debug, or trace".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// High-level error categorization for retry and alerting decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Security,
    Configuration,
}

/// Exponential-backoff retry policy, used by the worker loop for database
/// insert retries and by the queue gateway for connection retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
}

impl RetryPolicy {
    /// The queue gateway's connection-retry ladder: 50ms base delay,
    /// capped at 2s, up to 3 attempts.
    pub fn queue_connection() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 1.0,
            jitter_enabled: false,
        }
    }

    /// A flat 5s delay between worker DB-insert retries, retried
    /// indefinitely rather than giving up; see DESIGN.md for why this stays
    /// flat instead of backing off exponentially.
    pub fn worker_insert_backoff() -> Self {
        Self {
            max_attempts: u32::MAX,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.0,
            jitter_enabled: false,
        }
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let mut delay = self.base_delay.as_millis() as f64;
        for _ in 1..attempt {
            delay *= self.backoff_multiplier;
        }

        if self.jitter_enabled {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};

            let mut hasher = DefaultHasher::new();
            attempt.hash(&mut hasher);
            let hash = hasher.finish();
            let jitter_factor = 0.75 + (hash % 500) as f64 / 2000.0;
            delay *= jitter_factor;
        }

        let delay_ms = delay.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// Error type for input validation failures on domain types (config fields,
/// identifiers). Batch-level event validation failures use
/// [`validator::ValidationFailure`] instead, since those need an event
/// index and rule name rather than a single field.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },
}

/// Error type for string parsing failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error type for analytics-core operations.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AnalyticsError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::Parse(_) => ErrorCategory::Permanent,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Transient,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Event schema: the discriminated `Event` type and its closed enums.
pub mod event;

/// The PII sweep: recursive key-name scan over arbitrary JSON.
pub mod pii;

/// The batch validator.
pub mod validator;

/// The pure aggregator: grouping, percentiles, UPSERT row construction.
pub mod aggregator;

/// Bounded period-string parsing shared by the stats reader.
pub mod period;

/// The metrics-collector trait implemented by `analytics-api`.
pub mod monitoring;

pub use event::{
    AnalyticsLevel, Country, Event, EventCommon, EventDetailed, EventMinimal, EventStandard,
    Service, Status, Tool,
};
pub use monitoring::{MetricsCollector, NoOpMetricsCollector, QueueOp, WorkerErrorKind};
#[cfg(feature = "test-utils")]
pub use monitoring::MockMetricsCollector;
pub use period::{parse_period, InvalidPeriod, Period, PeriodUnit};
pub use validator::{validate_batch, ValidationFailure};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_round_trips_through_display_and_parse() {
        let id = EventId::new();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn correlation_id_round_trips_through_display_and_parse() {
        let id = CorrelationId::new();
        let parsed: CorrelationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn session_id_hash_rejects_wrong_length() {
        assert!(SessionIdHash::new("short").is_err());
        assert!(SessionIdHash::new("exactly16chars!!").is_ok());
    }

    #[test]
    fn timestamp_hour_alignment() {
        let aligned = Timestamp::from_rfc3339("2025-11-11T14:00:00Z").unwrap();
        let unaligned = Timestamp::from_rfc3339("2025-11-11T14:30:00Z").unwrap();
        assert!(aligned.is_hour_aligned());
        assert!(!unaligned.is_hour_aligned());
        assert_eq!(unaligned.truncated_to_hour(), aligned);
    }

    #[test]
    fn timestamp_keys_are_stable() {
        let ts = Timestamp::from_rfc3339("2025-11-11T14:00:00Z").unwrap();
        assert_eq!(ts.date_key(), "2025-11-11");
        assert_eq!(ts.hour_key(), "2025-11-11T14:00:00Z");
    }

    #[test]
    fn mode_parses_common_aliases() {
        assert_eq!("dev".parse::<Mode>().unwrap(), Mode::Development);
        assert_eq!("prod".parse::<Mode>().unwrap(), Mode::Production);
        assert!(Mode::Production.is_production());
        assert!(!Mode::Development.is_production());
    }

    #[test]
    fn retry_policy_backs_off_and_caps_at_max_delay() {
        let policy = RetryPolicy::queue_connection();
        assert_eq!(policy.calculate_delay(0), Duration::ZERO);
        assert!(policy.calculate_delay(1) <= policy.max_delay);
        assert!(policy.calculate_delay(10) <= policy.max_delay);
    }

    #[test]
    fn worker_insert_backoff_never_exhausts_attempts() {
        let policy = RetryPolicy::worker_insert_backoff();
        assert_eq!(policy.max_attempts, u32::MAX);
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(5));
    }

    #[test]
    fn analytics_error_transience_matches_category() {
        let internal = AnalyticsError::Internal { message: "db down".into() };
        assert!(internal.is_transient());
        assert_eq!(internal.error_category(), ErrorCategory::Transient);

        let validation = AnalyticsError::Validation(ValidationError::Required {
            field: "tool".into(),
        });
        assert!(!validation.is_transient());
        assert_eq!(validation.error_category(), ErrorCategory::Permanent);
    }
}
