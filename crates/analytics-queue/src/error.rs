//! Error taxonomy for the durable queue gateway and the shared-store
//! capabilities (rate limiter, stats cache) built on the same backend.

use std::time::Duration;

/// Errors surfaced by [`crate::DurableQueue`], [`crate::RateLimiter`], and
/// [`crate::StatsCache`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// `pushBatch` observed `currentDepth + len(entries) > maxQueueSize`
    ///. The push was rejected atomically; nothing was written.
    #[error("queue is at capacity ({current}/{max})")]
    Full { current: u64, max: u64 },

    /// The backing store could not be reached after the connection-retry
    /// ladder was exhausted.
    #[error("failed to connect to queue backend: {message}")]
    ConnectionFailed { message: String },

    /// A request to the backing store exceeded its deadline.
    #[error("queue backend operation timed out")]
    Timeout,

    /// An entry could not be serialized to or deserialized from its wire
    /// form. On pop, malformed entries are dropped with a warning rather
    /// than surfaced as this error — this variant is reserved
    /// for push-time serialization failures.
    #[error("failed to serialize queue entry: {message}")]
    SerializationError { message: String },
}

impl QueueError {
    /// Whether a caller should retry the operation. Capacity and
    /// serialization failures are permanent for the given input;
    /// connection and timeout failures are transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Timeout)
    }

    /// A `Retry-After` hint in seconds for a capacity rejection, surfaced
    /// to clients as part of the `queue_full` response.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Full { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_and_serialization_errors_are_permanent() {
        let full = QueueError::Full { current: 10, max: 10 };
        assert!(!full.is_transient());
        assert!(full.retry_after().is_some());

        let ser = QueueError::SerializationError { message: "bad".into() };
        assert!(!ser.is_transient());
        assert!(ser.retry_after().is_none());
    }

    #[test]
    fn connection_and_timeout_errors_are_transient() {
        assert!(QueueError::ConnectionFailed { message: "refused".into() }.is_transient());
        assert!(QueueError::Timeout.is_transient());
    }
}
