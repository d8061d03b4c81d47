//! The Time-Series Store Gateway.

use crate::error::StoreError;
use crate::queries::{ErrorStatsRow, OverviewRow, PerformanceRow, TimelinePoint, ToolStatsRow};
use analytics_core::aggregator::{percentile, DailyAggregateRow, ErrorSummaryRow, HourlyAggregateRow};
use analytics_core::monitoring::MetricsCollector;
use analytics_core::Event;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retention horizons for the four tables.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub raw_events: Duration,
    pub hourly_aggregations: Duration,
    pub daily_aggregations: Duration,
    pub error_summary: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw_events: Duration::from_secs(90 * 24 * 3600),
            hourly_aggregations: Duration::from_secs(30 * 24 * 3600),
            daily_aggregations: Duration::from_secs(730 * 24 * 3600),
            error_summary: Duration::from_secs(90 * 24 * 3600),
        }
    }
}

/// Wraps the connection pool and exposes the typed operations the service
/// needs: batch insert, three UPSERT entry points, parameterized
/// aggregate reads, and the retention sweep.
pub struct StoreGateway {
    pool: PgPool,
    retention: RetentionPolicy,
    metrics: Arc<dyn MetricsCollector>,
}

impl StoreGateway {
    pub fn new(pool: PgPool, retention: RetentionPolicy, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { pool, retention, metrics }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Records `database_queries_total`/`database_query_duration_seconds`
    /// for one statement. Called at each query call site below rather than
    /// wrapped around the whole method, so a multi-statement operation
    /// (a transaction, a per-row UPSERT loop) reports one observation per
    /// statement actually sent.
    fn record_query(&self, operation: &str, table: &str, start: Instant) {
        self.metrics.record_database_query(operation, table, start.elapsed());
    }

    /// Publishes `database_connection_pool{state}` from the pool's own
    /// counters. `sqlx::Pool` doesn't expose a count of tasks waiting on
    /// `acquire()`, so `waiting` is always reported as `0`; `total`/`idle`
    /// are exact. Called periodically by `analytics-worker`'s stats
    /// reporter and from `/v1/status`.
    pub fn record_pool_metrics(&self) {
        let total = self.pool.size() as i64;
        let idle = self.pool.num_idle() as i64;
        self.metrics.record_database_pool_state(total, idle, 0);
    }

    /// Cheap connectivity probe backing `/v1/health`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let start = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        self.record_query("select", "events", start);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Raw event insert
    // ------------------------------------------------------------------

    /// Writes every event in `batch` inside one transaction. On any error
    /// the whole batch rolls back — partial writes of a batch never become
    /// visible.
    pub async fn insert_events(&self, batch: &[Event]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let mut tx = self.pool.begin().await?;
        for event in batch {
            let common = event.common();
            let performance = event.performance();
            let (parameters, session_id, sequence_number) = match event {
                Event::Detailed(detailed) => (
                    Some(serde_json::to_value(&detailed.parameters).unwrap_or_default()),
                    Some(detailed.session_id.as_str().to_string()),
                    Some(detailed.sequence_number as i64),
                ),
                _ => (None, None, None),
            };

            sqlx::query(
                r#"
                INSERT INTO events (
                    timestamp_hour, version, tool, status, analytics_level,
                    response_time_ms, service, cache_hit, retry_count, country,
                    parameters, session_id, sequence_number, error_type
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(*common.timestamp_hour.as_datetime())
            .bind(&common.version)
            .bind(common.tool.as_str())
            .bind(common.status.as_str())
            .bind(event.level().as_str())
            .bind(performance.map(|p| p.response_time_ms as i32))
            .bind(performance.map(|p| p.service.as_str()))
            .bind(performance.map(|p| p.cache_hit))
            .bind(performance.map(|p| p.retry_count as i16))
            .bind(event.country().map(|c| c.as_str().to_string()))
            .bind(parameters)
            .bind(session_id)
            .bind(sequence_number)
            .bind(event.error_type())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.record_query("insert", "events", start);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Aggregate UPSERTs
    // ------------------------------------------------------------------

    /// Natural-key UPSERT for hourly rows: counts add, `avg_response_time_ms`
    /// is recomputed as a weighted mean, `p95_response_time_ms` is replaced
    /// by the incoming batch's own value.
    pub async fn upsert_hourly_aggregates(&self, rows: &[HourlyAggregateRow]) -> Result<(), StoreError> {
        let start = Instant::now();
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO hourly_aggregations
                    (hour, tool, version, total_calls, success_calls, error_calls,
                     avg_response_time_ms, p95_response_time_ms, cache_hit_count,
                     cache_miss_count, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
                ON CONFLICT (hour, tool, version) DO UPDATE SET
                    total_calls = hourly_aggregations.total_calls + EXCLUDED.total_calls,
                    success_calls = hourly_aggregations.success_calls + EXCLUDED.success_calls,
                    error_calls = hourly_aggregations.error_calls + EXCLUDED.error_calls,
                    avg_response_time_ms = CASE
                        WHEN hourly_aggregations.total_calls + EXCLUDED.total_calls = 0 THEN NULL
                        ELSE (
                            COALESCE(hourly_aggregations.avg_response_time_ms, 0.0) * hourly_aggregations.total_calls
                            + COALESCE(EXCLUDED.avg_response_time_ms, 0.0) * EXCLUDED.total_calls
                        ) / (hourly_aggregations.total_calls + EXCLUDED.total_calls)
                    END,
                    p95_response_time_ms = EXCLUDED.p95_response_time_ms,
                    cache_hit_count = hourly_aggregations.cache_hit_count + EXCLUDED.cache_hit_count,
                    cache_miss_count = hourly_aggregations.cache_miss_count + EXCLUDED.cache_miss_count,
                    updated_at = now()
                "#,
            )
            .bind(parse_hour_key(&row.hour))
            .bind(row.tool.as_str())
            .bind(&row.version)
            .bind(row.total_calls as i64)
            .bind(row.success_calls as i64)
            .bind(row.error_calls as i64)
            .bind(row.avg_response_time_ms)
            .bind(row.p95_response_time_ms)
            .bind(row.cache_hit_count as i64)
            .bind(row.cache_miss_count as i64)
            .execute(&self.pool)
            .await?;
        }
        self.record_query("upsert", "hourly_aggregations", start);
        Ok(())
    }

    /// Natural-key UPSERT for daily rows. Counts, min/max, and per-service
    /// counters are additive; percentiles are recomputed server-side from
    /// the merged response-time sample.
    pub async fn upsert_daily_aggregates(&self, rows: &[DailyAggregateRow]) -> Result<(), StoreError> {
        let start = Instant::now();
        for row in rows {
            let p50 = percentile(&row.response_times, 0.50);
            let p95 = percentile(&row.response_times, 0.95);
            let p99 = percentile(&row.response_times, 0.99);
            let noaa = row.service_counters(analytics_core::Service::Noaa);
            let openmeteo = row.service_counters(analytics_core::Service::Openmeteo);

            sqlx::query(
                r#"
                INSERT INTO daily_aggregations
                    (date, tool, version, country, total_calls, success_calls, error_calls,
                     avg_response_time_ms, p50, p95, p99, min_rt, max_rt, cache_hit_count, cache_miss_count,
                     noaa_calls, noaa_success_calls, openmeteo_calls, openmeteo_success_calls,
                     total_retries, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, now())
                ON CONFLICT (date, tool, version, country) DO UPDATE SET
                    total_calls = daily_aggregations.total_calls + EXCLUDED.total_calls,
                    success_calls = daily_aggregations.success_calls + EXCLUDED.success_calls,
                    error_calls = daily_aggregations.error_calls + EXCLUDED.error_calls,
                    avg_response_time_ms = CASE
                        WHEN daily_aggregations.total_calls + EXCLUDED.total_calls = 0 THEN NULL
                        ELSE (
                            COALESCE(daily_aggregations.avg_response_time_ms, 0.0) * daily_aggregations.total_calls
                            + COALESCE(EXCLUDED.avg_response_time_ms, 0.0) * EXCLUDED.total_calls
                        ) / (daily_aggregations.total_calls + EXCLUDED.total_calls)
                    END,
                    p50 = EXCLUDED.p50,
                    p95 = EXCLUDED.p95,
                    p99 = EXCLUDED.p99,
                    min_rt = LEAST(daily_aggregations.min_rt, EXCLUDED.min_rt),
                    max_rt = GREATEST(daily_aggregations.max_rt, EXCLUDED.max_rt),
                    cache_hit_count = daily_aggregations.cache_hit_count + EXCLUDED.cache_hit_count,
                    cache_miss_count = daily_aggregations.cache_miss_count + EXCLUDED.cache_miss_count,
                    noaa_calls = daily_aggregations.noaa_calls + EXCLUDED.noaa_calls,
                    noaa_success_calls = daily_aggregations.noaa_success_calls + EXCLUDED.noaa_success_calls,
                    openmeteo_calls = daily_aggregations.openmeteo_calls + EXCLUDED.openmeteo_calls,
                    openmeteo_success_calls = daily_aggregations.openmeteo_success_calls + EXCLUDED.openmeteo_success_calls,
                    total_retries = daily_aggregations.total_retries + EXCLUDED.total_retries,
                    updated_at = now()
                "#,
            )
            .bind(parse_date_key(&row.date))
            .bind(row.tool.as_str())
            .bind(&row.version)
            .bind(&row.country)
            .bind(row.total_calls as i64)
            .bind(row.success_calls as i64)
            .bind(row.error_calls as i64)
            .bind(row.avg_response_time_ms)
            .bind(p50)
            .bind(p95)
            .bind(p99)
            .bind(row.min_rt.map(|v| v as i32))
            .bind(row.max_rt.map(|v| v as i32))
            .bind(row.cache_hit_count as i64)
            .bind(row.cache_miss_count as i64)
            .bind(noaa.calls as i64)
            .bind(noaa.success_calls as i64)
            .bind(openmeteo.calls as i64)
            .bind(openmeteo.success_calls as i64)
            .bind(row.total_retries as i64)
            .execute(&self.pool)
            .await?;
        }
        self.record_query("upsert", "daily_aggregations", start);
        Ok(())
    }

    /// Natural-key UPSERT for error-summary rows: `count` adds, `first_seen`
    /// takes the minimum, `last_seen` the maximum, `affected_versions`
    /// becomes the set union.
    pub async fn upsert_error_summary(&self, rows: &[ErrorSummaryRow]) -> Result<(), StoreError> {
        let start = Instant::now();
        for row in rows {
            let versions: Vec<String> = row.affected_versions.iter().cloned().collect();
            sqlx::query(
                r#"
                INSERT INTO error_summary (hour, tool, error_type, count, first_seen, last_seen, affected_versions, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, now())
                ON CONFLICT (hour, tool, error_type) DO UPDATE SET
                    count = error_summary.count + EXCLUDED.count,
                    first_seen = LEAST(error_summary.first_seen, EXCLUDED.first_seen),
                    last_seen = GREATEST(error_summary.last_seen, EXCLUDED.last_seen),
                    affected_versions = (
                        SELECT array_agg(DISTINCT v) FROM unnest(
                            error_summary.affected_versions || EXCLUDED.affected_versions
                        ) AS v
                    ),
                    updated_at = now()
                "#,
            )
            .bind(parse_hour_key(&row.hour))
            .bind(row.tool.as_str())
            .bind(&row.error_type)
            .bind(row.count as i64)
            .bind(*row.first_seen.as_datetime())
            .bind(*row.last_seen.as_datetime())
            .bind(&versions)
            .execute(&self.pool)
            .await?;
        }
        self.record_query("upsert", "error_summary", start);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Aggregate reads
    // ------------------------------------------------------------------

    pub async fn query_overview(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_hourly: bool,
    ) -> Result<OverviewRow, StoreError> {
        let query_start = Instant::now();
        let table = if use_hourly { "hourly_aggregations" } else { "daily_aggregations" };
        let row = if use_hourly {
            sqlx::query_as::<_, OverviewRow>(
                r#"
                SELECT
                    COALESCE(SUM(total_calls), 0) AS total_calls,
                    COALESCE(SUM(success_calls), 0) AS success_calls,
                    COALESCE(SUM(error_calls), 0) AS error_calls,
                    COALESCE(SUM(cache_hit_count), 0) AS cache_hit_count,
                    COALESCE(SUM(cache_miss_count), 0) AS cache_miss_count,
                    CASE WHEN SUM(total_calls) = 0 THEN NULL
                         ELSE SUM(avg_response_time_ms * total_calls) / SUM(total_calls) END AS avg_response_time_ms,
                    MAX(p95_response_time_ms) AS p95_response_time_ms
                FROM hourly_aggregations WHERE hour >= $1 AND hour < $2
                "#,
            )
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, OverviewRow>(
                r#"
                SELECT
                    COALESCE(SUM(total_calls), 0) AS total_calls,
                    COALESCE(SUM(success_calls), 0) AS success_calls,
                    COALESCE(SUM(error_calls), 0) AS error_calls,
                    COALESCE(SUM(cache_hit_count), 0) AS cache_hit_count,
                    COALESCE(SUM(cache_miss_count), 0) AS cache_miss_count,
                    CASE WHEN SUM(total_calls) = 0 THEN NULL
                         ELSE SUM(avg_response_time_ms * total_calls) / SUM(total_calls) END AS avg_response_time_ms,
                    MAX(p95) AS p95_response_time_ms
                FROM daily_aggregations WHERE date >= $1 AND date < $2
                "#,
            )
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await?
        };
        self.record_query("select", table, query_start);
        Ok(row)
    }

    pub async fn query_tools(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_hourly: bool,
    ) -> Result<Vec<ToolStatsRow>, StoreError> {
        let query_start = Instant::now();
        let table = if use_hourly { "hourly_aggregations" } else { "daily_aggregations" };
        let rows = if use_hourly {
            sqlx::query_as::<_, ToolStatsRow>(
                r#"
                SELECT tool,
                    SUM(total_calls) AS total_calls,
                    SUM(success_calls) AS success_calls,
                    CASE WHEN SUM(total_calls) = 0 THEN NULL
                         ELSE SUM(avg_response_time_ms * total_calls) / SUM(total_calls) END AS avg_response_time_ms,
                    MAX(p95_response_time_ms) AS p95_response_time_ms
                FROM hourly_aggregations WHERE hour >= $1 AND hour < $2
                GROUP BY tool ORDER BY tool
                "#,
            )
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, ToolStatsRow>(
                r#"
                SELECT tool,
                    SUM(total_calls) AS total_calls,
                    SUM(success_calls) AS success_calls,
                    CASE WHEN SUM(total_calls) = 0 THEN NULL
                         ELSE SUM(avg_response_time_ms * total_calls) / SUM(total_calls) END AS avg_response_time_ms,
                    MAX(p95) AS p95_response_time_ms
                FROM daily_aggregations WHERE date >= $1 AND date < $2
                GROUP BY tool ORDER BY tool
                "#,
            )
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?
        };
        self.record_query("select", table, query_start);
        Ok(rows)
    }

    pub async fn query_tool_timeline(
        &self,
        tool: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_hourly: bool,
    ) -> Result<Vec<TimelinePoint>, StoreError> {
        let query_start = Instant::now();
        let table = if use_hourly { "hourly_aggregations" } else { "daily_aggregations" };
        let rows = if use_hourly {
            sqlx::query_as::<_, TimelinePoint>(
                r#"
                SELECT hour AS bucket, total_calls, success_calls, error_calls
                FROM hourly_aggregations
                WHERE tool = $1 AND hour >= $2 AND hour < $3
                ORDER BY hour
                "#,
            )
            .bind(tool)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, TimelinePoint>(
                r#"
                SELECT date AS bucket, SUM(total_calls) AS total_calls,
                       SUM(success_calls) AS success_calls, SUM(error_calls) AS error_calls
                FROM daily_aggregations
                WHERE tool = $1 AND date >= $2 AND date < $3
                GROUP BY date ORDER BY date
                "#,
            )
            .bind(tool)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?
        };
        self.record_query("select", table, query_start);
        Ok(rows)
    }

    pub async fn query_errors(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tool: Option<&str>,
    ) -> Result<Vec<ErrorStatsRow>, StoreError> {
        let query_start = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT error_type, SUM(count) AS count, MAX(last_seen) AS last_seen,
                   array_agg(DISTINCT tool) AS affected_tools
            FROM error_summary
            WHERE hour >= $1 AND hour < $2 AND ($3::text IS NULL OR tool = $3)
            GROUP BY error_type ORDER BY count DESC
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(tool)
        .fetch_all(&self.pool)
        .await?;
        self.record_query("select", "error_summary", query_start);

        Ok(rows
            .into_iter()
            .map(|row| ErrorStatsRow {
                error_type: row.get("error_type"),
                count: row.get("count"),
                last_seen: row.get("last_seen"),
                affected_tools: row.get("affected_tools"),
            })
            .collect())
    }

    pub async fn query_performance(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRow>, StoreError> {
        let query_start = Instant::now();
        let rows = sqlx::query_as::<_, PerformanceRow>(
            r#"
            SELECT tool,
                AVG(p50) AS p50, AVG(p95) AS p95, AVG(p99) AS p99,
                SUM(cache_hit_count) AS cache_hit_count, SUM(cache_miss_count) AS cache_miss_count
            FROM daily_aggregations WHERE date >= $1 AND date < $2
            GROUP BY tool ORDER BY tool
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        self.record_query("select", "daily_aggregations", query_start);
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Retention sweep
    // ------------------------------------------------------------------

    /// Deletes rows older than each table's retention horizon. Intended to
    /// be called on a periodic timer by `analytics-worker` alongside the
    /// main poll loop.
    pub async fn run_retention_sweep(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let start = Instant::now();
        let raw_cutoff = now - chrono::Duration::from_std(self.retention.raw_events).unwrap_or_default();
        sqlx::query("DELETE FROM events WHERE received_at < $1")
            .bind(raw_cutoff)
            .execute(&self.pool)
            .await?;
        self.record_query("delete", "events", start);

        let start = Instant::now();
        let hourly_cutoff = now - chrono::Duration::from_std(self.retention.hourly_aggregations).unwrap_or_default();
        sqlx::query("DELETE FROM hourly_aggregations WHERE hour < $1")
            .bind(hourly_cutoff)
            .execute(&self.pool)
            .await?;
        self.record_query("delete", "hourly_aggregations", start);

        let start = Instant::now();
        let daily_cutoff = now - chrono::Duration::from_std(self.retention.daily_aggregations).unwrap_or_default();
        sqlx::query("DELETE FROM daily_aggregations WHERE date < $1")
            .bind(daily_cutoff)
            .execute(&self.pool)
            .await?;
        self.record_query("delete", "daily_aggregations", start);

        let start = Instant::now();
        let error_cutoff = now - chrono::Duration::from_std(self.retention.error_summary).unwrap_or_default();
        sqlx::query("DELETE FROM error_summary WHERE hour < $1")
            .bind(error_cutoff)
            .execute(&self.pool)
            .await?;
        self.record_query("delete", "error_summary", start);

        Ok(())
    }
}

fn parse_hour_key(hour_key: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(hour_key)
        .expect("hour_key is always produced by Timestamp::hour_key")
        .with_timezone(&Utc)
}

fn parse_date_key(date_key: &str) -> DateTime<Utc> {
    let naive = chrono::NaiveDate::parse_from_str(date_key, "%Y-%m-%d")
        .expect("date_key is always produced by Timestamp::date_key")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");
    naive.and_utc()
}
