//! Connection-retry helper shared by every backend operation: retries with
//! exponential backoff (50ms x attempts, capped at 2s) up to 3 retries per
//! request; beyond that, the caller observes a failure.

use crate::error::QueueError;
use analytics_core::RetryPolicy;
use std::future::Future;

/// Runs `op`, retrying on transient [`QueueError`]s according to
/// [`RetryPolicy::queue_connection`]. Non-transient errors (capacity,
/// serialization) are returned immediately without retrying.
pub async fn with_connection_retries<T, F, Fut>(mut op: F) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    let policy = RetryPolicy::queue_connection();
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                attempt += 1;
                tracing::warn!(attempt, error = %err, "queue backend operation failed, retrying");
                tokio::time::sleep(policy.calculate_delay(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures_within_budget() {
        let attempts = AtomicUsize::new(0);
        let result = with_connection_retries(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(QueueError::ConnectionFailed { message: "refused".into() })
            } else {
                Ok::<_, QueueError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), QueueError> = with_connection_retries(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::Timeout)
        })
        .await;
        assert!(result.is_err());
        // 1 initial attempt + 3 retries = 4 total.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn never_retries_permanent_errors() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), QueueError> = with_connection_retries(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::Full { current: 10, max: 10 })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
