//! In-flight worker counters and the periodic stats-reporter task: logs
//! `{inFlight, totalProcessed, errorCount, queueDepth}` every 60 seconds.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Atomic counters updated by the main loop and read by the reporter task.
/// Plain atomics rather than a mutex: every field is an independent
/// monotonic or small-range counter, so there is no cross-field invariant
/// that needs a single lock to protect.
#[derive(Debug, Default)]
pub struct WorkerStats {
    in_flight: AtomicI64,
    total_processed: AtomicU64,
    error_count: AtomicU64,
    aggregate_error_count: AtomicU64,
}

impl WorkerStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter_processing(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit_processing(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_batch_processed(&self, count: usize) {
        self.total_processed.fetch_add(count as u64, Ordering::SeqCst);
    }

    pub fn record_insert_error(&self) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_aggregate_error(&self) {
        self.aggregate_error_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            total_processed: self.total_processed.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            aggregate_error_count: self.aggregate_error_count.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub in_flight: i64,
    pub total_processed: u64,
    pub error_count: u64,
    pub aggregate_error_count: u64,
}

/// Runs until `shutdown` fires, logging a snapshot plus the current queue
/// depth every `interval`, and publishing the store's connection-pool gauges
/// on the same tick. Cancelled on shutdown rather than left running, so it
/// never holds a queue connection open past process exit.
pub async fn run_stats_reporter(
    stats: Arc<WorkerStats>,
    queue: Arc<dyn analytics_queue::DurableQueue>,
    store: Arc<analytics_store::StoreGateway>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = stats.snapshot();
                let depth = queue.depth().await.unwrap_or(0);
                store.record_pool_metrics();
                info!(
                    in_flight = snapshot.in_flight,
                    total_processed = snapshot.total_processed,
                    error_count = snapshot.error_count,
                    aggregate_error_count = snapshot.aggregate_error_count,
                    queue_depth = depth,
                    "worker stats"
                );
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_concurrent_batches() {
        let stats = WorkerStats::new();
        stats.enter_processing();
        stats.enter_processing();
        stats.record_batch_processed(10);
        stats.record_insert_error();
        stats.exit_processing();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.in_flight, 1);
        assert_eq!(snapshot.total_processed, 10);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.aggregate_error_count, 0);
    }
}
