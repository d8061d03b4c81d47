//! Prometheus-backed implementation of `analytics_core::MetricsCollector`:
//! registers the twelve named series and exposes them for the
//! `GET /metrics` scrape handler.

use analytics_core::monitoring::{MetricsCollector, QueueOp, WorkerErrorKind};
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Owns every metrics series the service exposes. Registered once at startup
/// and shared as `Arc<dyn MetricsCollector>` across the ingestion handlers,
/// the stats reader, and `analytics-worker`'s worker loop, which constructs
/// its own instance in its own process.
#[derive(Debug)]
pub struct PrometheusMetrics {
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,

    events_received_total: IntCounterVec,
    events_processed_total: IntCounterVec,

    queue_depth: IntGauge,
    queue_operations_total: IntCounterVec,

    database_queries_total: IntCounterVec,
    database_query_duration_seconds: HistogramVec,
    database_connection_pool: IntGaugeVec,

    worker_batch_size: Histogram,
    worker_errors_total: IntCounterVec,

    cache_operations_total: IntCounterVec,
}

impl PrometheusMetrics {
    /// Registers every series against the default global registry. Called
    /// once from `analytics-service`'s and `analytics-worker`'s startup
    /// paths; a second call from the same process would fail with an
    /// `AlreadyReg` error, which is why both binaries construct exactly one
    /// instance and share it.
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        Ok(Arc::new(Self {
            http_requests_total: register_int_counter_vec!(
                "http_requests_total",
                "Total HTTP requests by route, method, and status code",
                &["route", "method", "status_code"]
            )?,
            http_request_duration_seconds: register_histogram_vec!(
                "http_request_duration_seconds",
                "HTTP request latency by route, method, and status code",
                &["route", "method", "status_code"],
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )?,

            events_received_total: register_int_counter_vec!(
                "events_received_total",
                "Events admitted past validation, by analytics level and tool",
                &["analytics_level", "tool"]
            )?,
            events_processed_total: register_int_counter_vec!(
                "events_processed_total",
                "Events processed by the worker loop, by outcome",
                &["status"]
            )?,

            queue_depth: register_int_gauge!("queue_depth", "Current durable queue depth")?,
            queue_operations_total: register_int_counter_vec!(
                "queue_operations_total",
                "Queue operations by kind",
                &["op"]
            )?,

            database_queries_total: register_int_counter_vec!(
                "database_queries_total",
                "Database queries by operation and table",
                &["operation", "table"]
            )?,
            database_query_duration_seconds: register_histogram_vec!(
                "database_query_duration_seconds",
                "Database query latency by operation and table",
                &["operation", "table"],
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )?,
            database_connection_pool: register_int_gauge_vec!(
                "database_connection_pool",
                "Database connection pool size by state",
                &["state"]
            )?,

            worker_batch_size: register_histogram!(
                "worker_batch_size",
                "Number of events processed per worker batch",
                vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0]
            )?,
            worker_errors_total: register_int_counter_vec!(
                "worker_errors_total",
                "Worker loop errors by type",
                &["type"]
            )?,

            cache_operations_total: register_int_counter_vec!(
                "cache_operations_total",
                "Stats cache operations by result",
                &["result"]
            )?,
        }))
    }

    /// Renders the process-global default registry (the one every
    /// `register_*!` call above registers against) in Prometheus text
    /// exposition format for the `GET /metrics` handler. An associated
    /// function rather than a method: the registry it reads is a
    /// process-global singleton, not a field of `self`.
    pub fn gather_text() -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl MetricsCollector for PrometheusMetrics {
    fn record_http_request(&self, route: &str, method: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.http_requests_total
            .with_label_values(&[route, method, &status])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[route, method, &status])
            .observe(duration.as_secs_f64());
    }

    fn record_event_received(&self, analytics_level: &str, tool: &str) {
        self.events_received_total
            .with_label_values(&[analytics_level, tool])
            .inc();
    }

    fn record_event_processed(&self, status: &str) {
        self.events_processed_total.with_label_values(&[status]).inc();
    }

    fn record_queue_depth(&self, depth: i64) {
        self.queue_depth.set(depth);
    }

    fn record_queue_operation(&self, op: QueueOp) {
        self.queue_operations_total.with_label_values(&[op.as_str()]).inc();
    }

    fn record_database_query(&self, operation: &str, table: &str, duration: Duration) {
        self.database_queries_total
            .with_label_values(&[operation, table])
            .inc();
        self.database_query_duration_seconds
            .with_label_values(&[operation, table])
            .observe(duration.as_secs_f64());
    }

    fn record_database_pool_state(&self, total: i64, idle: i64, waiting: i64) {
        self.database_connection_pool.with_label_values(&["total"]).set(total);
        self.database_connection_pool.with_label_values(&["idle"]).set(idle);
        self.database_connection_pool
            .with_label_values(&["waiting"])
            .set(waiting);
    }

    fn record_worker_batch_size(&self, size: usize) {
        self.worker_batch_size.observe(size as f64);
    }

    fn record_worker_error(&self, kind: WorkerErrorKind) {
        self.worker_errors_total.with_label_values(&[kind.as_str()]).inc();
    }

    fn record_cache_operation(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_operations_total.with_label_values(&[result]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test process registers against the same global default registry,
    // so only one test here actually constructs a `PrometheusMetrics` — a
    // second `new()` call in the same process would collide on metric
    // names. Behavior is instead exercised against the trait through
    // `analytics_core::NoOpMetricsCollector` in the core crate's own tests;
    // this module only checks that construction and rendering succeed once.
    #[test]
    fn new_registers_without_error_and_gather_renders_text() {
        let metrics = PrometheusMetrics::new().expect("registration must succeed once per process");
        metrics.record_http_request("/v1/events", "POST", 202, Duration::from_millis(4));
        metrics.record_queue_depth(7);
        metrics.record_worker_batch_size(50);
        metrics.record_cache_operation(true);

        let rendered = PrometheusMetrics::gather_text().expect("gather must succeed");
        let text = String::from_utf8(rendered).expect("exposition format is valid utf8");
        assert!(text.contains("http_requests_total"));
        assert!(text.contains("queue_depth"));
    }
}
