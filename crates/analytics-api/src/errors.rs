//! The error taxonomy: every handler failure funnels through
//! [`ApiError`], which owns the mapping to an HTTP status code and the
//! shared `{error, details?, retry_after?}` response body shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{error, warn};

/// The seven error kinds the service can return, each carrying whatever
/// detail the handler that raised it already had;
/// `IntoResponse` decides how much of that detail survives into the
/// response body based on whether the service is running in production
/// mode.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A batch failed `analytics_core::validate_batch`. Maps to `400`; the
    /// `details` array carries one `"Event {i}: {message}"` string per
    /// failure.
    #[error("validation failed")]
    ValidationFailed { details: Vec<String> },

    /// The request body exceeded `API_BODY_LIMIT_KB` before any JSON
    /// parsing was attempted. Maps to `413`.
    #[error("payload too large: {size} bytes (max {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    /// The caller exceeded `RATE_LIMIT_PER_MINUTE` + `RATE_LIMIT_BURST`.
    /// Maps to `429` with a `Retry-After` header.
    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// The durable queue rejected the batch because
    /// `currentDepth + len(entries) > maxQueueSize`. Maps to `503` with a `Retry-After` header.
    #[error("queue is at capacity")]
    QueueFull { retry_after_secs: u64 },

    /// The store or queue backend could not be reached. Maps to `503`.
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// A `period` query parameter failed `analytics_core::parse_period`.
    /// Maps to `400`; rejected before any query plan is built.
    #[error("invalid period: {reason}")]
    InvalidPeriod { reason: String },

    /// Anything else: a bug, an unexpected panic boundary, a dependency
    /// failure with no more specific taxonomy entry. Maps to `500`; detail
    /// is always logged server-side and never echoed to the client
    /// regardless of mode.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidPeriod { .. } => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_label(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "validation_failed",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::QueueFull { .. } => "queue_full",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::InvalidPeriod { .. } => "invalid_period",
            Self::Internal { .. } => "internal_error",
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            Self::QueueFull { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Renders the response body, omitting `details` in production mode for
    /// every variant except `validation_failed` and `invalid_period` —
    /// those details are the caller's own input echoed back, not server
    /// internals, so they're safe regardless of mode.
    fn render(&self, sanitize: bool) -> serde_json::Value {
        let details: Option<serde_json::Value> = match self {
            Self::ValidationFailed { details } => Some(serde_json::json!(details)),
            Self::InvalidPeriod { reason } => Some(serde_json::json!(reason)),
            Self::PayloadTooLarge { size, max } => {
                Some(serde_json::json!(format!("{size} bytes exceeds the {max} byte limit")))
            }
            Self::ServiceUnavailable { message } if !sanitize => Some(serde_json::json!(message)),
            Self::Internal { message } if !sanitize => Some(serde_json::json!(message)),
            _ => None,
        };

        let mut body = serde_json::json!({ "error": self.error_label() });
        if let Some(details) = details {
            body["details"] = details;
        }
        if let Some(retry_after) = self.retry_after() {
            body["retry_after"] = serde_json::json!(retry_after);
        }
        body
    }

    /// Builds the axum response. Production-mode sanitization is decided by
    /// the caller (the handler knows `AppConfig::sanitize_errors()`)
    /// because `ApiError` itself carries no config reference.
    pub fn into_response_with_mode(self, sanitize: bool) -> Response {
        match &self {
            Self::Internal { message } => error!(%message, "internal error"),
            Self::ServiceUnavailable { message } => warn!(%message, "service unavailable"),
            Self::QueueFull { .. } => warn!("queue at capacity, rejecting batch"),
            Self::RateLimitExceeded { .. } => warn!("rate limit exceeded"),
            _ => {}
        }

        let status = self.status();
        let retry_after = self.retry_after();
        let body = self.render(sanitize);
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

/// Default `IntoResponse` sanitizes (production-safe default) since most
/// call sites reach this through `?` inside a handler that has already
/// decided error handling belongs here rather than in the handler body.
/// Handlers that need mode-aware rendering call
/// [`ApiError::into_response_with_mode`] directly instead of relying on
/// this impl.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with_mode(true)
    }
}

impl From<analytics_queue::QueueError> for ApiError {
    fn from(err: analytics_queue::QueueError) -> Self {
        let retry_after_secs = err
            .retry_after()
            .map(|d| d.as_secs().max(1))
            .unwrap_or(1);
        match err {
            analytics_queue::QueueError::Full { .. } => Self::QueueFull { retry_after_secs },
            other => Self::ServiceUnavailable {
                message: other.to_string(),
            },
        }
    }
}

impl From<analytics_store::StoreError> for ApiError {
    fn from(err: analytics_store::StoreError) -> Self {
        Self::ServiceUnavailable {
            message: err.to_string(),
        }
    }
}

/// Startup-time failures in [`crate::start_server`], kept distinct from
/// [`ApiError`] since they occur before any request is ever served and map
/// to process exit codes rather than HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("server failed: {message}")]
    ServerFailed { message: String },

    #[error("configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigError),
}
