//! Redis-backed implementation of the durable queue, rate limiter, and
//! stats cache.
//!
//! The queue is a single Redis list (`LPUSH`/`RPOP`). Capacity-checked push
//! runs as a Lua script so the length check and the push happen as one
//! atomic step on the server, so concurrent API workers cannot collectively
//! overshoot capacity.

use crate::error::QueueError;
use crate::retry::with_connection_retries;
use crate::{
    DurableQueue, RateLimitDecision, RateLimiter, StatsCache, REPEATED_VIOLATION_BLOCK_MULTIPLIER,
    REPEATED_VIOLATION_THRESHOLD,
};
use analytics_core::Event;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;

/// Atomically checks `LLEN key + #entries <= max` and `RPUSH`es, or returns
/// `0` (rejected) without modifying the list. Returns `1` on success.
const PUSH_BATCH_SCRIPT: &str = r#"
local key = KEYS[1]
local max = tonumber(ARGV[1])
local current = redis.call('LLEN', key)
local incoming = #ARGV - 1
if current + incoming > max then
    return 0
end
for i = 2, #ARGV do
    redis.call('RPUSH', key, ARGV[i])
end
return 1
"#;

/// Atomically increments the per-identifier counter, setting its
/// expiration on first use so the window self-resets (a fixed-window
/// approximation of a sliding window — acceptable because the burst
/// allowance already tolerates boundary effects). An identifier already
/// under an active block (set below) is denied outright without touching
/// the window counter. Once the violation counter reaches the threshold,
/// a block key is set with an extended TTL so the identifier stays denied
/// past the point the base window would otherwise have reset.
///
/// Returns `{allowed, retry_after_seconds, violation_count}`.
const RATE_LIMIT_SCRIPT: &str = r#"
local window_key = KEYS[1]
local violations_key = KEYS[2]
local block_key = KEYS[3]
local window_seconds = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local threshold = tonumber(ARGV[3])
local block_multiplier = tonumber(ARGV[4])

local block_ttl = redis.call('TTL', block_key)
if block_ttl and block_ttl > 0 then
    local violations = tonumber(redis.call('GET', violations_key) or '0')
    return {0, block_ttl, violations}
end

local count = redis.call('INCR', window_key)
if count == 1 then
    redis.call('EXPIRE', window_key, window_seconds)
end

if count <= limit then
    return {1, redis.call('TTL', window_key), 0}
end

local violations = redis.call('INCR', violations_key)
redis.call('EXPIRE', violations_key, window_seconds)

if violations >= threshold then
    local block_seconds = window_seconds * block_multiplier
    redis.call('SET', block_key, 1, 'EX', block_seconds)
    return {0, block_seconds, violations}
end

return {0, redis.call('TTL', window_key), violations}
"#;

/// Redis-backed store for the durable queue, rate limiter, and stats
/// cache. One [`ConnectionManager`] is shared across all three so rate-limit
/// state lives on the same store that backs the queue. `ConnectionManager`
/// clones are cheap (a shared multiplexed connection), so every operation
/// clones its own handle rather than holding a lock.
pub struct RedisStore {
    conn: ConnectionManager,
    queue_key: String,
    max_queue_size: u64,
    violations_key_prefix: String,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://host:port/db`), applying the
    /// connection-retry ladder to the initial handshake.
    pub async fn connect(
        url: &str,
        queue_key: String,
        max_queue_size: u64,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(|e| QueueError::ConnectionFailed {
            message: e.to_string(),
        })?;

        let conn = with_connection_retries(|| {
            let client = client.clone();
            async move {
                ConnectionManager::new(client)
                    .await
                    .map_err(|e| QueueError::ConnectionFailed { message: e.to_string() })
            }
        })
        .await?;

        Ok(Self {
            conn,
            queue_key,
            max_queue_size,
            violations_key_prefix: "ratelimit:violations:".to_string(),
        })
    }

    fn rate_limit_key(&self, identifier: &str) -> String {
        format!("ratelimit:window:{identifier}")
    }

    fn block_key(&self, identifier: &str) -> String {
        format!("ratelimit:blocked:{identifier}")
    }
}

#[async_trait]
impl DurableQueue for RedisStore {
    async fn push_batch(&self, entries: Vec<Event>) -> Result<(), QueueError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut payloads = Vec::with_capacity(entries.len());
        for entry in &entries {
            let json = serde_json::to_string(entry).map_err(|e| QueueError::SerializationError {
                message: e.to_string(),
            })?;
            payloads.push(json);
        }

        let script = Script::new(PUSH_BATCH_SCRIPT);
        let conn = self.conn.clone();
        let queue_key = self.queue_key.clone();
        let max_queue_size = self.max_queue_size;

        let accepted: i32 = with_connection_retries(|| {
            let mut invocation = script.key(queue_key.clone()).arg(max_queue_size);
            for payload in &payloads {
                invocation = invocation.arg(payload);
            }
            let mut conn = conn.clone();
            async move {
                invocation
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| QueueError::ConnectionFailed { message: e.to_string() })
            }
        })
        .await?;

        if accepted == 0 {
            let current = self.depth().await.unwrap_or(0);
            return Err(QueueError::Full {
                current,
                max: max_queue_size,
            });
        }
        Ok(())
    }

    async fn pop_batch(&self, n: usize) -> Result<Vec<Event>, QueueError> {
        let Some(count) = std::num::NonZeroUsize::new(n) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.clone();
        let queue_key = self.queue_key.clone();

        let raw: Vec<String> = with_connection_retries(|| {
            let mut conn = conn.clone();
            let queue_key = queue_key.clone();
            async move {
                conn.lpop(&queue_key, Some(count))
                    .await
                    .map_err(|e| QueueError::ConnectionFailed { message: e.to_string() })
            }
        })
        .await?;

        let mut events = Vec::with_capacity(raw.len());
        for payload in raw {
            match serde_json::from_str::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(error) => {
                    tracing::warn!(%error, "dropping malformed queue entry on pop");
                }
            }
        }
        Ok(events)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let conn = self.conn.clone();
        let queue_key = self.queue_key.clone();
        with_connection_retries(|| {
            let mut conn = conn.clone();
            let queue_key = queue_key.clone();
            async move {
                conn.llen(&queue_key)
                    .await
                    .map_err(|e| QueueError::ConnectionFailed { message: e.to_string() })
            }
        })
        .await
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.queue_key)
            .await
            .map_err(|e| QueueError::ConnectionFailed { message: e.to_string() })
    }
}

#[async_trait]
impl RateLimiter for RedisStore {
    async fn check(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, QueueError> {
        let window_key = self.rate_limit_key(identifier);
        let violations_key = format!("{}{}", self.violations_key_prefix, identifier);
        let block_key = self.block_key(identifier);
        let window_seconds = window.as_secs().max(1) as i64;
        let script = Script::new(RATE_LIMIT_SCRIPT);
        let conn = self.conn.clone();

        let (allowed_raw, retry_after_secs, violation_count): (i64, i64, i64) =
            with_connection_retries(|| {
                let mut conn = conn.clone();
                let window_key = window_key.clone();
                let violations_key = violations_key.clone();
                let block_key = block_key.clone();
                async move {
                    script
                        .key(window_key)
                        .key(violations_key)
                        .key(block_key)
                        .arg(window_seconds)
                        .arg(limit)
                        .arg(REPEATED_VIOLATION_THRESHOLD)
                        .arg(REPEATED_VIOLATION_BLOCK_MULTIPLIER)
                        .invoke_async(&mut conn)
                        .await
                        .map_err(|e| QueueError::ConnectionFailed { message: e.to_string() })
                }
            })
            .await?;

        Ok(RateLimitDecision {
            allowed: allowed_raw != 0,
            retry_after: Duration::from_secs(retry_after_secs.max(0) as u64),
            violation_count: violation_count as u32,
        })
    }
}

#[async_trait]
impl StatsCache for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        with_connection_retries(|| {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                conn.get(&key)
                    .await
                    .map_err(|e| QueueError::ConnectionFailed { message: e.to_string() })
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        let ttl_seconds = ttl.as_secs().max(1);
        with_connection_retries(|| {
            let mut conn = conn.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                conn.set_ex::<_, _, ()>(&key, value, ttl_seconds)
                    .await
                    .map_err(|e| QueueError::ConnectionFailed { message: e.to_string() })
            }
        })
        .await
    }
}

// Redis requires a live server for these code paths; exercised by
// analytics-integration-tests behind a feature flag, not here.
