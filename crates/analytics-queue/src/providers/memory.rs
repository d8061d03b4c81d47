//! In-memory backend: a single-process stand-in for Redis used by tests and
//! local development (`MODE=test`, or `MODE=development` without a
//! `REDIS_HOST`). Implements all three shared-store capabilities so the
//! crate can be exercised without a running Redis instance.

use crate::error::QueueError;
use crate::{
    DurableQueue, RateLimitDecision, RateLimiter, StatsCache, REPEATED_VIOLATION_BLOCK_MULTIPLIER,
    REPEATED_VIOLATION_THRESHOLD,
};
use analytics_core::Event;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

struct RateWindow {
    count: u32,
    window_started_at: Instant,
    violations: u32,
    /// Set once `violations` reaches [`REPEATED_VIOLATION_THRESHOLD`]; the
    /// identifier is denied outright until this instant, regardless of
    /// whether the underlying window would otherwise have reset.
    blocked_until: Option<Instant>,
}

/// A single in-process store backing all three capabilities, guarded by
/// plain `Mutex`es — appropriate for the bounded, low-contention workloads
/// of tests and single-instance dev mode. Never used in production (the
/// capacity invariant under concurrent handlers requires the Redis
/// provider's atomic Lua script; see [`crate::providers::redis`]).
pub struct InMemoryStore {
    max_queue_size: u64,
    queue: Mutex<VecDeque<Event>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    rate_windows: Mutex<HashMap<String, RateWindow>>,
}

impl InMemoryStore {
    pub fn new(max_queue_size: u64) -> Self {
        Self {
            max_queue_size,
            queue: Mutex::new(VecDeque::new()),
            cache: Mutex::new(HashMap::new()),
            rate_windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DurableQueue for InMemoryStore {
    async fn push_batch(&self, entries: Vec<Event>) -> Result<(), QueueError> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let current = queue.len() as u64;
        if current + entries.len() as u64 > self.max_queue_size {
            return Err(QueueError::Full {
                current,
                max: self.max_queue_size,
            });
        }
        queue.extend(entries);
        Ok(())
    }

    async fn pop_batch(&self, n: usize) -> Result<Vec<Event>, QueueError> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let take = n.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.queue.lock().expect("queue mutex poisoned").len() as u64)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        self.queue.lock().expect("queue mutex poisoned").clear();
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for InMemoryStore {
    async fn check(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, QueueError> {
        let mut windows = self.rate_windows.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let entry = windows.entry(identifier.to_string()).or_insert(RateWindow {
            count: 0,
            window_started_at: now,
            violations: 0,
            blocked_until: None,
        });

        if let Some(blocked_until) = entry.blocked_until {
            if now < blocked_until {
                return Ok(RateLimitDecision {
                    allowed: false,
                    retry_after: blocked_until - now,
                    violation_count: entry.violations,
                });
            }
            entry.blocked_until = None;
        }

        if now.duration_since(entry.window_started_at) >= window {
            entry.count = 0;
            entry.window_started_at = now;
        }

        entry.count += 1;
        let allowed = entry.count <= limit;
        if !allowed {
            entry.violations += 1;
            if entry.violations >= REPEATED_VIOLATION_THRESHOLD {
                entry.blocked_until = Some(now + window * REPEATED_VIOLATION_BLOCK_MULTIPLIER);
            }
        }

        let retry_after = entry
            .blocked_until
            .map(|until| until - now)
            .unwrap_or_else(|| window.saturating_sub(now.duration_since(entry.window_started_at)));

        Ok(RateLimitDecision {
            allowed,
            retry_after,
            violation_count: entry.violations,
        })
    }
}

#[async_trait]
impl StatsCache for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let mut cache = self.cache.lock().expect("cache mutex poisoned");
        if let Some(entry) = cache.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
            cache.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError> {
        self.cache.lock().expect("cache mutex poisoned").insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_core::validate_batch;
    use serde_json::json;

    fn one_event() -> Event {
        let batch = json!({ "events": [{
            "version": "1.0.0",
            "tool": "get_forecast",
            "status": "success",
            "timestamp_hour": "2025-11-11T14:00:00Z",
            "analytics_level": "minimal",
        }]});
        validate_batch(&batch).unwrap().remove(0)
    }

    #[tokio::test]
    async fn push_pop_preserves_fifo_order() {
        let store = InMemoryStore::new(10);
        store.push_batch(vec![one_event(), one_event()]).await.unwrap();
        assert_eq!(store.depth().await.unwrap(), 2);
        let popped = store.pop_batch(1).await.unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(store.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn push_over_capacity_is_rejected_atomically() {
        let store = InMemoryStore::new(1);
        store.push_batch(vec![one_event()]).await.unwrap();
        let err = store.push_batch(vec![one_event()]).await.unwrap_err();
        assert!(matches!(err, QueueError::Full { .. }));
        assert_eq!(store.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pop_returns_fewer_than_requested_without_blocking() {
        let store = InMemoryStore::new(10);
        store.push_batch(vec![one_event()]).await.unwrap();
        let popped = store.pop_batch(50).await.unwrap();
        assert_eq!(popped.len(), 1);
    }

    #[tokio::test]
    async fn rate_limiter_allows_up_to_limit_then_blocks() {
        let store = InMemoryStore::new(10);
        for _ in 0..3 {
            let decision = store.check("client-a", 3, Duration::from_secs(60)).await.unwrap();
            assert!(decision.allowed);
        }
        let blocked = store.check("client-a", 3, Duration::from_secs(60)).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.violation_count, 1);
    }

    #[tokio::test]
    async fn repeated_violators_are_blocked_past_the_base_window() {
        let store = InMemoryStore::new(10);
        let window = Duration::from_millis(20);

        for _ in 0..2 {
            store.check("client-b", 2, window).await.unwrap();
        }
        // Three denials in a row trips the repeated-violator threshold.
        for _ in 0..REPEATED_VIOLATION_THRESHOLD {
            store.check("client-b", 2, window).await.unwrap();
        }

        // Even after the base window would have reset, the identifier
        // remains blocked because the extended block is still active.
        tokio::time::sleep(window + Duration::from_millis(5)).await;
        let decision = store.check("client-b", 2, window).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after > window);
    }

    #[tokio::test]
    async fn cache_entry_expires_after_ttl() {
        let store = InMemoryStore::new(10);
        store.set("key", "value", Duration::from_millis(10)).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("key").await.unwrap(), None);
    }
}
