//! Typed result rows returned by [`crate::StoreGateway`]'s aggregate
//! queries, consumed by the stats reader (C8) in `analytics-api`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Global summary for `/v1/stats/overview`.
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct OverviewRow {
    pub total_calls: i64,
    pub success_calls: i64,
    pub error_calls: i64,
    pub cache_hit_count: i64,
    pub cache_miss_count: i64,
    pub avg_response_time_ms: Option<f64>,
    pub p95_response_time_ms: Option<f64>,
}

/// One row of the per-tool breakdown for `/v1/stats/tools`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ToolStatsRow {
    pub tool: String,
    pub total_calls: i64,
    pub success_calls: i64,
    pub avg_response_time_ms: Option<f64>,
    pub p95_response_time_ms: Option<f64>,
}

/// One time-series point for `/v1/stats/tool/:toolName`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TimelinePoint {
    pub bucket: DateTime<Utc>,
    pub total_calls: i64,
    pub success_calls: i64,
    pub error_calls: i64,
}

/// One error breakdown row for `/v1/stats/tool/:toolName` and
/// `/v1/stats/errors`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ErrorStatsRow {
    pub error_type: String,
    pub count: i64,
    pub last_seen: DateTime<Utc>,
    pub affected_tools: Vec<String>,
}

/// One row of `/v1/stats/performance`. Sourced from `daily_aggregations`
/// regardless of window length, because `hourly_aggregations` only stores
/// `p95_response_time_ms` and this endpoint needs the full p50/p95/p99
/// triple (see DESIGN.md for this reading of the performance endpoint).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PerformanceRow {
    pub tool: String,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub cache_hit_count: i64,
    pub cache_miss_count: i64,
}
