//! # Analytics Queue
//!
//! The Durable Queue Gateway (C3) plus the two other capabilities that
//! share its backing store: the sliding-window rate limiter (C5) and the
//! stats read-through cache (C8). All three are modeled as traits
//! here so `analytics-api` and `analytics-worker` depend on behavior, not
//! on Redis directly; [`providers::redis`] and [`providers::memory`]
//! supply the implementations.
//!
//! ## Why one crate for three capabilities
//!
//! The rate limiter and the cache both live via the durable queue's
//! backing store, so that a clustered deployment enforces a single global
//! budget and a single cache. Splitting them into separate crates would
//! either duplicate the connection-pool wiring three times or force an
//! artificial dependency between otherwise-unrelated crates; keeping them
//! together here means `analytics-api` takes one dependency for all
//! Redis-backed concerns.

pub mod error;
pub mod providers;
pub mod retry;

pub use error::QueueError;

use analytics_core::Event;
use async_trait::async_trait;
use std::time::Duration;

/// The Durable Queue Gateway.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Atomically checks `currentDepth + entries.len() <= maxQueueSize` and
    /// appends, or rejects the entire batch with [`QueueError::Full`]. Must
    /// be a single server-side atomic step so concurrent API handlers
    /// cannot collectively overshoot capacity.
    async fn push_batch(&self, entries: Vec<Event>) -> Result<(), QueueError>;

    /// Removes up to `n` entries from the head. Returns fewer if fewer
    /// exist; returns empty without blocking. Malformed entries encountered
    /// during the pop are dropped with a warning rather than propagated.
    async fn pop_batch(&self, n: usize) -> Result<Vec<Event>, QueueError>;

    /// Current queue length.
    async fn depth(&self) -> Result<u64, QueueError>;

    /// Test/maintenance only: empties the queue.
    async fn clear(&self) -> Result<(), QueueError>;
}

/// Number of window violations after which an identifier is temporarily
/// blocked outright, rather than merely denied for the rest of the current
/// window.
pub const REPEATED_VIOLATION_THRESHOLD: u32 = 3;

/// How much longer than the base window a repeated violator is blocked for,
/// expressed as a multiple of the window.
pub const REPEATED_VIOLATION_BLOCK_MULTIPLIER: u32 = 5;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Duration,
    /// Count of window violations observed for this identifier so far.
    /// Once this reaches [`REPEATED_VIOLATION_THRESHOLD`] the identifier is
    /// blocked for [`REPEATED_VIOLATION_BLOCK_MULTIPLIER`] times the base
    /// window, rather than merely for the remainder of the current one.
    pub violation_count: u32,
}

/// Sliding-window rate limiter shared across server instances via the
/// queue's backing store.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Checks and atomically increments the per-identifier window counter.
    /// `limit` is the sliding-window budget (`RATE_LIMIT_PER_MINUTE`),
    /// `window` is one minute.
    async fn check(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, QueueError>;
}

/// Read-through stats cache: a thin
/// `cached(key, ttl, producer)` helper every stats endpoint uses.
#[async_trait]
pub trait StatsCache: Send + Sync {
    /// Fetches a previously-cached JSON body for `key`, if present and
    /// unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>, QueueError>;

    /// Stores `value` under `key` with the given TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError>;
}

/// Runs `producer` only on a cache miss, populating the cache with its
/// result before returning it: a thin helper used by every stats endpoint.
/// Returns `(value, was_hit)` so callers can drive the
/// `cache_operations_total{result}` metric.
pub async fn cached<F, Fut>(
    cache: &dyn StatsCache,
    key: &str,
    ttl: Duration,
    producer: F,
) -> Result<(String, bool), QueueError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<String, QueueError>>,
{
    if let Some(hit) = cache.get(key).await? {
        return Ok((hit, true));
    }
    let value = producer().await?;
    cache.set(key, &value, ttl).await?;
    Ok((value, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn cached_helper_only_calls_producer_on_miss() {
        let store = Arc::new(InMemoryStore::new(100));
        let calls = AtomicUsize::new(0);

        let (first, hit1) = cached(store.as_ref(), "k", Duration::from_secs(60), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("body".to_string()) }
        })
        .await
        .unwrap();
        assert_eq!(first, "body");
        assert!(!hit1);

        let (second, hit2) = cached(store.as_ref(), "k", Duration::from_secs(60), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("should-not-run".to_string()) }
        })
        .await
        .unwrap();
        assert_eq!(second, "body");
        assert!(hit2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
