//! # Analytics Worker
//!
//! The Worker Loop: the state machine that drains the
//! durable queue, persists raw events, and rolls them into the hourly/daily/
//! error aggregates. One instance per process; multiple worker processes
//! may run concurrently against the same queue and store.
//!
//! `states: Idle -> Polling -> Processing -> Idle`, with an orthogonal
//! shutdown path `* -> Draining -> Stopped` driven by a `watch::Receiver<bool>`
//! shared with the process's signal handler.

pub mod config;
pub mod error;
pub mod stats;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use stats::{run_stats_reporter, WorkerStats, WorkerStatsSnapshot};

use analytics_core::aggregator::group_batch;
use analytics_core::monitoring::{MetricsCollector, QueueOp, WorkerErrorKind};
use analytics_core::Event;
use analytics_queue::DurableQueue;
use analytics_store::StoreGateway;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Owns the queue and store handles and drives the poll/process/drain
/// cycle. Cheap to construct; intended to be wrapped in an `Arc` and run
/// as a single long-lived task.
pub struct WorkerLoop {
    queue: Arc<dyn DurableQueue>,
    store: Arc<StoreGateway>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
    metrics: Arc<dyn MetricsCollector>,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        store: Arc<StoreGateway>,
        config: WorkerConfig,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            stats: WorkerStats::new(),
            metrics,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn queue_handle(&self) -> Arc<dyn DurableQueue> {
        self.queue.clone()
    }

    /// Runs until `shutdown` is set to `true`, then drains: anything
    /// dequeued but not yet durably persisted is pushed back onto the
    /// queue before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                info!("worker shutdown requested, stopping poll loop");
                break;
            }

            let events = match self.queue.pop_batch(self.config.batch_size).await {
                Ok(events) => events,
                Err(e) => {
                    self.metrics.record_worker_error(WorkerErrorKind::Dequeue);
                    error!(error = %e, "failed to pop batch from queue");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            if let Ok(depth) = self.queue.depth().await {
                self.metrics.record_queue_depth(depth);
            }

            if events.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            self.metrics.record_queue_operation(QueueOp::Pop);

            // Shutdown may have been requested between the pop above and
            // here; if so, the batch is handed back rather than processed.
            if *shutdown.borrow() {
                self.requeue_on_shutdown(events).await;
                break;
            }

            self.process_batch(events).await;
        }

        info!("worker loop stopped");
    }

    async fn requeue_on_shutdown(&self, events: Vec<Event>) {
        let count = events.len();
        if let Err(e) = self.queue.push_batch(events).await {
            error!(error = %e, batch_size = count, "failed to re-push batch during shutdown, events may be lost");
        } else {
            info!(batch_size = count, "re-pushed undequeued batch before shutdown");
        }
    }

    async fn process_batch(&self, events: Vec<Event>) {
        self.stats.enter_processing();
        let batch_size = events.len();

        if let Err(e) = self.store.insert_events(&events).await {
            self.stats.record_insert_error();
            self.metrics.record_worker_error(WorkerErrorKind::DatabaseInsert);
            error!(error = %e, batch_size, "failed to insert event batch, re-queueing for retry");
            self.requeue_on_shutdown(events).await;
            tokio::time::sleep(self.config.insert_retry_backoff).await;
            self.stats.exit_processing();
            return;
        }
        self.metrics.record_event_processed("inserted");

        // Raw events are durable at this point; aggregate failures are
        // logged but never re-queue the batch.
        if let Err(e) = self.apply_aggregates(&events).await {
            self.stats.record_aggregate_error();
            self.metrics.record_worker_error(WorkerErrorKind::AggregateUpdate);
            warn!(error = %e, batch_size, "failed to apply aggregate upserts");
        } else {
            self.metrics.record_event_processed("aggregated");
        }

        self.metrics.record_worker_batch_size(batch_size);
        self.stats.record_batch_processed(batch_size);
        self.stats.exit_processing();
    }

    async fn apply_aggregates(&self, events: &[Event]) -> Result<(), WorkerError> {
        let grouped = group_batch(events);
        self.store.upsert_hourly_aggregates(&grouped.hourly).await?;
        self.store.upsert_daily_aggregates(&grouped.daily).await?;
        self.store.upsert_error_summary(&grouped.errors).await?;
        Ok(())
    }
}
