//! The metrics-collector trait.
//!
//! Domain and infrastructure code report metrics through this trait rather
//! than depending on a Prometheus client directly, so that `analytics-core`
//! stays free of infrastructure dependencies and the validator/aggregator
//! remain testable without a running metrics registry.
//! `analytics-api` provides the Prometheus-backed implementation; this
//! crate only defines what gets collected.
//!
//! # Best-effort pattern
//!
//! Implementations must never fail or block business logic. A metrics
//! backend outage is not a reason to reject a request or drop an event.

use std::time::Duration;

/// Collects the series the ingestion and read paths report. All methods take `&self` so a
/// single collector can be shared as `Arc<dyn MetricsCollector>` across the
/// ingestion handlers, the worker loop, and the stats reader.
#[cfg_attr(feature = "test-utils", mockall::automock)]
pub trait MetricsCollector: Send + Sync {
    /// `http_requests_total{route, method, status_code}` and
    /// `http_request_duration_seconds{route, method, status_code}`.
    fn record_http_request(&self, route: &str, method: &str, status_code: u16, duration: Duration);

    /// `events_received_total{analytics_level, tool}`, one call per event
    /// admitted past validation.
    fn record_event_received(&self, analytics_level: &str, tool: &str);

    /// `events_processed_total{status}`, one call per event after the
    /// worker's insert step.
    fn record_event_processed(&self, status: &str);

    /// `queue_depth` gauge.
    fn record_queue_depth(&self, depth: i64);

    /// `queue_operations_total{op}` where `op` is push/pop/reject.
    fn record_queue_operation(&self, op: QueueOp);

    /// `database_queries_total{operation, table}` and
    /// `database_query_duration_seconds{operation, table}`.
    fn record_database_query(&self, operation: &str, table: &str, duration: Duration);

    /// `database_connection_pool{state}` gauge, state = total/idle/waiting.
    fn record_database_pool_state(&self, total: i64, idle: i64, waiting: i64);

    /// `worker_batch_size` histogram observation.
    fn record_worker_batch_size(&self, size: usize);

    /// `worker_errors_total{type}` where type is
    /// database_insert/aggregate_update/dequeue.
    fn record_worker_error(&self, kind: WorkerErrorKind);

    /// `cache_operations_total{result}` where result is hit/miss.
    fn record_cache_operation(&self, hit: bool);
}

/// The `op` label for `queue_operations_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOp {
    Push,
    Pop,
    Reject,
}

impl QueueOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Reject => "reject",
        }
    }
}

/// The `type` label for `worker_errors_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerErrorKind {
    DatabaseInsert,
    AggregateUpdate,
    Dequeue,
}

impl WorkerErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseInsert => "database_insert",
            Self::AggregateUpdate => "aggregate_update",
            Self::Dequeue => "dequeue",
        }
    }
}

/// No-op collector for unit tests and pure-logic call sites that don't care
/// about metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsCollector;

impl MetricsCollector for NoOpMetricsCollector {
    fn record_http_request(&self, _route: &str, _method: &str, _status_code: u16, _duration: Duration) {}
    fn record_event_received(&self, _analytics_level: &str, _tool: &str) {}
    fn record_event_processed(&self, _status: &str) {}
    fn record_queue_depth(&self, _depth: i64) {}
    fn record_queue_operation(&self, _op: QueueOp) {}
    fn record_database_query(&self, _operation: &str, _table: &str, _duration: Duration) {}
    fn record_database_pool_state(&self, _total: i64, _idle: i64, _waiting: i64) {}
    fn record_worker_batch_size(&self, _size: usize) {}
    fn record_worker_error(&self, _kind: WorkerErrorKind) {}
    fn record_cache_operation(&self, _hit: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn noop_collector_accepts_all_calls() {
        let metrics: Arc<dyn MetricsCollector> = Arc::new(NoOpMetricsCollector);
        metrics.record_http_request("/v1/events", "POST", 202, Duration::from_millis(5));
        metrics.record_event_received("minimal", "get_forecast");
        metrics.record_event_processed("success");
        metrics.record_queue_depth(42);
        metrics.record_queue_operation(QueueOp::Push);
        metrics.record_database_query("insert", "events", Duration::from_millis(2));
        metrics.record_database_pool_state(10, 8, 0);
        metrics.record_worker_batch_size(50);
        metrics.record_worker_error(WorkerErrorKind::Dequeue);
        metrics.record_cache_operation(true);
    }

    #[test]
    fn label_strings_match_spec_enum_values() {
        assert_eq!(QueueOp::Push.as_str(), "push");
        assert_eq!(QueueOp::Pop.as_str(), "pop");
        assert_eq!(QueueOp::Reject.as_str(), "reject");
        assert_eq!(WorkerErrorKind::DatabaseInsert.as_str(), "database_insert");
        assert_eq!(WorkerErrorKind::AggregateUpdate.as_str(), "aggregate_update");
        assert_eq!(WorkerErrorKind::Dequeue.as_str(), "dequeue");
    }
}
