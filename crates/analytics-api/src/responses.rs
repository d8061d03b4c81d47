//! Response DTOs and query-parameter types for the stats and ingestion
//! HTTP surface. Row types read straight off `analytics-store`'s query
//! layer are re-exported here rather than wrapped, since the store's
//! `#[derive(Serialize)]` rows already match the response shapes the
//! handlers need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `202 Accepted` body for `POST /v1/events`.
#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub status: &'static str,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// `200 OK` body for `GET /v1/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// `200 OK` body for `GET /v1/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub queue_depth: u64,
    pub events_processed_24h: i64,
    pub last_event_received: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
}

/// Query parameters shared by every `/v1/stats/*` endpoint.
#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

/// Combined response for `GET /v1/stats/tool/:toolName`: the per-tool
/// timeline plus any errors recorded for that tool in the same window.
#[derive(Debug, Serialize)]
pub struct ToolDetailResponse {
    pub tool: String,
    pub timeline: Vec<analytics_store::TimelinePoint>,
    pub errors: Vec<analytics_store::ErrorStatsRow>,
}
