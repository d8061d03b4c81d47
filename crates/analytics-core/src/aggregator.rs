//! The pure aggregator.
//!
//! Given a batch of validated events, groups them by the natural keys for
//! each of the three aggregate tables, computes the derived metrics, and
//! returns rowsets ready for a natural-key UPSERT. This module issues no
//! I/O itself — `analytics-store` calls [`group_batch`] and then persists
//! the resulting rows via its own UPSERT statements, merging against
//! existing rows with [`HourlyAggregateRow::merge`] /
//! [`DailyAggregateRow::merge`] / [`ErrorSummaryRow::merge`].

use crate::event::{Event, Service, Tool};
use crate::Timestamp;
use std::collections::{BTreeMap, BTreeSet};

/// One contribution to the hourly aggregate, keyed by `(hour, tool, version)`.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyAggregateRow {
    pub hour: String,
    pub tool: Tool,
    pub version: String,
    pub total_calls: u64,
    pub success_calls: u64,
    pub error_calls: u64,
    pub avg_response_time_ms: Option<f64>,
    pub p95_response_time_ms: Option<f64>,
    pub cache_hit_count: u64,
    pub cache_miss_count: u64,
}

impl HourlyAggregateRow {
    pub fn cache_hit_rate(&self) -> Option<f64> {
        rate(self.cache_hit_count, self.cache_miss_count)
    }

    /// UPSERT merge: counts add, `avg_response_time_ms` is a weighted mean
    /// over old and new totals, and the stored percentile is replaced by a
    /// fresh recomputation seeded by the incoming batch only.
    pub fn merge(existing: Option<&Self>, incoming: Self) -> Self {
        let Some(existing) = existing else {
            return incoming;
        };
        debug_assert_eq!(existing.hour, incoming.hour);
        debug_assert_eq!(existing.tool, incoming.tool);
        debug_assert_eq!(existing.version, incoming.version);

        let old_total = existing.total_calls;
        let new_total = old_total + incoming.total_calls;
        let avg = match (existing.avg_response_time_ms, incoming.avg_response_time_ms) {
            (Some(old_avg), Some(new_avg)) => {
                let old_sum = old_avg * old_total as f64;
                let new_sum = new_avg * incoming.total_calls as f64;
                Some((old_sum + new_sum) / new_total as f64)
            }
            (Some(old_avg), None) => Some(old_avg),
            (None, Some(new_avg)) => Some(new_avg),
            (None, None) => None,
        };

        Self {
            hour: existing.hour.clone(),
            tool: existing.tool,
            version: existing.version.clone(),
            total_calls: new_total,
            success_calls: existing.success_calls + incoming.success_calls,
            error_calls: existing.error_calls + incoming.error_calls,
            avg_response_time_ms: avg,
            p95_response_time_ms: incoming.p95_response_time_ms,
            cache_hit_count: existing.cache_hit_count + incoming.cache_hit_count,
            cache_miss_count: existing.cache_miss_count + incoming.cache_miss_count,
        }
    }
}

/// Per-service call/success counters feeding the daily aggregate's
/// per-service success rate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServiceCounters {
    pub calls: u64,
    pub success_calls: u64,
}

impl ServiceCounters {
    pub fn success_rate(&self) -> Option<f64> {
        rate(self.success_calls, self.calls - self.success_calls)
    }

    fn merge(self, other: Self) -> Self {
        Self {
            calls: self.calls + other.calls,
            success_calls: self.success_calls + other.success_calls,
        }
    }
}

/// One contribution to the daily aggregate, keyed by
/// `(date, tool, version, country)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyAggregateRow {
    pub date: String,
    pub tool: Tool,
    pub version: String,
    pub country: String,
    pub total_calls: u64,
    pub success_calls: u64,
    pub error_calls: u64,
    pub response_times: Vec<u32>,
    pub avg_response_time_ms: Option<f64>,
    pub min_rt: Option<u32>,
    pub max_rt: Option<u32>,
    pub cache_hit_count: u64,
    pub cache_miss_count: u64,
    pub noaa: ServiceCounters,
    pub openmeteo: ServiceCounters,
    pub total_retries: u64,
}

impl DailyAggregateRow {
    pub fn cache_hit_rate(&self) -> Option<f64> {
        rate(self.cache_hit_count, self.cache_miss_count)
    }

    pub fn avg_retry_count(&self) -> Option<f64> {
        if self.total_calls == 0 {
            None
        } else {
            Some(self.total_retries as f64 / self.total_calls as f64)
        }
    }

    pub fn service_counters(&self, service: Service) -> ServiceCounters {
        match service {
            Service::Noaa => self.noaa,
            Service::Openmeteo => self.openmeteo,
        }
    }

    /// Merge against an existing stored row. Counts, service counters, and
    /// min/max are commutative; the percentile sample is recomputed from
    /// whichever response-time values are retained across the merge, so
    /// percentiles themselves are not strictly commutative across merges.
    pub fn merge(existing: Option<&Self>, incoming: Self) -> Self {
        let Some(existing) = existing else {
            return incoming;
        };

        let mut response_times = existing.response_times.clone();
        response_times.extend(incoming.response_times.iter().copied());

        let old_total = existing.total_calls;
        let new_total = old_total + incoming.total_calls;
        let avg_response_time_ms = match (existing.avg_response_time_ms, incoming.avg_response_time_ms) {
            (Some(old_avg), Some(new_avg)) => {
                let old_sum = old_avg * old_total as f64;
                let new_sum = new_avg * incoming.total_calls as f64;
                Some((old_sum + new_sum) / new_total as f64)
            }
            (Some(old_avg), None) => Some(old_avg),
            (None, Some(new_avg)) => Some(new_avg),
            (None, None) => None,
        };

        Self {
            date: existing.date.clone(),
            tool: existing.tool,
            version: existing.version.clone(),
            country: existing.country.clone(),
            total_calls: new_total,
            success_calls: existing.success_calls + incoming.success_calls,
            error_calls: existing.error_calls + incoming.error_calls,
            response_times,
            avg_response_time_ms,
            min_rt: min_opt(existing.min_rt, incoming.min_rt),
            max_rt: max_opt(existing.max_rt, incoming.max_rt),
            cache_hit_count: existing.cache_hit_count + incoming.cache_hit_count,
            cache_miss_count: existing.cache_miss_count + incoming.cache_miss_count,
            noaa: existing.noaa.merge(incoming.noaa),
            openmeteo: existing.openmeteo.merge(incoming.openmeteo),
            total_retries: existing.total_retries + incoming.total_retries,
        }
    }
}

/// One contribution to the error summary, keyed by `(hour, tool, error_type)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorSummaryRow {
    pub hour: String,
    pub tool: Tool,
    pub error_type: String,
    pub count: u64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub affected_versions: BTreeSet<String>,
}

impl ErrorSummaryRow {
    /// UPSERT merge: count adds, `first_seen` takes the minimum,
    /// `last_seen` the maximum, `affected_versions` becomes the set union.
    pub fn merge(existing: Option<&Self>, incoming: Self) -> Self {
        let Some(existing) = existing else {
            return incoming;
        };
        Self {
            hour: existing.hour.clone(),
            tool: existing.tool,
            error_type: existing.error_type.clone(),
            count: existing.count + incoming.count,
            first_seen: existing.first_seen.min(incoming.first_seen),
            last_seen: existing.last_seen.max(incoming.last_seen),
            affected_versions: existing
                .affected_versions
                .union(&incoming.affected_versions)
                .cloned()
                .collect(),
        }
    }
}

/// The three rowsets produced by grouping a batch, in the lexicographic
/// key order UPSERTs should be issued in.
#[derive(Debug, Clone, Default)]
pub struct GroupedBatch {
    pub hourly: Vec<HourlyAggregateRow>,
    pub daily: Vec<DailyAggregateRow>,
    pub errors: Vec<ErrorSummaryRow>,
}

/// Groups a batch of events into hourly/daily/error-summary contributions.
/// Processes events in their queued order.
pub fn group_batch(events: &[Event]) -> GroupedBatch {
    let mut hourly: BTreeMap<(String, Tool, String), Vec<&Event>> = BTreeMap::new();
    let mut daily: BTreeMap<(String, Tool, String, String), Vec<&Event>> = BTreeMap::new();
    let mut errors: BTreeMap<(String, Tool, String), Vec<&Event>> = BTreeMap::new();

    for event in events {
        let common = event.common();
        let hour_key = common.timestamp_hour.hour_key();
        let date_key = common.timestamp_hour.date_key();
        let country = event
            .country()
            .map(|c| c.as_str().to_string())
            .unwrap_or_default();

        hourly
            .entry((hour_key.clone(), common.tool, common.version.clone()))
            .or_default()
            .push(event);
        daily
            .entry((date_key, common.tool, common.version.clone(), country))
            .or_default()
            .push(event);

        if common.status.is_error() {
            if let Some(error_type) = event.error_type() {
                if !error_type.is_empty() {
                    errors
                        .entry((hour_key, common.tool, error_type.to_string()))
                        .or_default()
                        .push(event);
                }
            }
        }
    }

    GroupedBatch {
        hourly: hourly
            .into_iter()
            .map(|((hour, tool, version), evs)| build_hourly_row(hour, tool, version, &evs))
            .collect(),
        daily: daily
            .into_iter()
            .map(|((date, tool, version, country), evs)| {
                build_daily_row(date, tool, version, country, &evs)
            })
            .collect(),
        errors: errors
            .into_iter()
            .map(|((hour, tool, error_type), evs)| {
                build_error_row(hour, tool, error_type, &evs)
            })
            .collect(),
    }
}

fn build_hourly_row(hour: String, tool: Tool, version: String, events: &[&Event]) -> HourlyAggregateRow {
    let total_calls = events.len() as u64;
    let success_calls = events.iter().filter(|e| !e.common().status.is_error()).count() as u64;
    let error_calls = total_calls - success_calls;

    let response_times: Vec<u32> = events.iter().filter_map(|e| e.response_time_ms()).collect();
    let avg_response_time_ms = mean(&response_times);
    let p95_response_time_ms = percentile(&response_times, 0.95);

    let cache_hit_count = events.iter().filter(|e| e.cache_hit() == Some(true)).count() as u64;
    let cache_miss_count = events.iter().filter(|e| e.cache_hit() == Some(false)).count() as u64;

    HourlyAggregateRow {
        hour,
        tool,
        version,
        total_calls,
        success_calls,
        error_calls,
        avg_response_time_ms,
        p95_response_time_ms,
        cache_hit_count,
        cache_miss_count,
    }
}

fn build_daily_row(
    date: String,
    tool: Tool,
    version: String,
    country: String,
    events: &[&Event],
) -> DailyAggregateRow {
    let total_calls = events.len() as u64;
    let success_calls = events.iter().filter(|e| !e.common().status.is_error()).count() as u64;
    let error_calls = total_calls - success_calls;

    let response_times: Vec<u32> = events.iter().filter_map(|e| e.response_time_ms()).collect();
    let avg_response_time_ms = mean(&response_times);
    let min_rt = response_times.iter().min().copied();
    let max_rt = response_times.iter().max().copied();

    let cache_hit_count = events.iter().filter(|e| e.cache_hit() == Some(true)).count() as u64;
    let cache_miss_count = events.iter().filter(|e| e.cache_hit() == Some(false)).count() as u64;

    let mut noaa = ServiceCounters::default();
    let mut openmeteo = ServiceCounters::default();
    for event in events {
        let Some(service) = event.service() else { continue };
        let success = !event.common().status.is_error();
        let counters = match service {
            Service::Noaa => &mut noaa,
            Service::Openmeteo => &mut openmeteo,
        };
        counters.calls += 1;
        if success {
            counters.success_calls += 1;
        }
    }

    let total_retries: u64 = events
        .iter()
        .filter_map(|e| e.retry_count())
        .map(|r| r as u64)
        .sum();

    DailyAggregateRow {
        date,
        tool,
        version,
        country,
        total_calls,
        success_calls,
        error_calls,
        response_times,
        avg_response_time_ms,
        min_rt,
        max_rt,
        cache_hit_count,
        cache_miss_count,
        noaa,
        openmeteo,
        total_retries,
    }
}

fn build_error_row(hour: String, tool: Tool, error_type: String, events: &[&Event]) -> ErrorSummaryRow {
    let count = events.len() as u64;
    let mut first_seen = events[0].common().timestamp_hour;
    let mut last_seen = first_seen;
    let mut affected_versions = BTreeSet::new();
    for event in events {
        let ts = event.common().timestamp_hour;
        first_seen = first_seen.min(ts);
        last_seen = last_seen.max(ts);
        affected_versions.insert(event.common().version.clone());
    }
    ErrorSummaryRow {
        hour,
        tool,
        error_type,
        count,
        first_seen,
        last_seen,
        affected_versions,
    }
}

/// Percentile via linear interpolation between the two nearest ranks in the
/// sorted sample. Returns `None` for an empty sample.
pub fn percentile(values: &[u32], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    if sorted.len() == 1 {
        return Some(sorted[0] as f64);
    }

    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower] as f64);
    }
    let fraction = rank - lower as f64;
    let interpolated =
        sorted[lower] as f64 + fraction * (sorted[upper] as f64 - sorted[lower] as f64);
    Some(interpolated)
}

fn mean(values: &[u32]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64)
}

/// `hits / (hits + misses)`, or `None` when both are zero.
pub fn rate(hits: u64, misses: u64) -> Option<f64> {
    let total = hits + misses;
    if total == 0 {
        None
    } else {
        Some(hits as f64 / total as f64)
    }
}

fn min_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AnalyticsLevel, EventCommon, EventMinimal, EventStandard, PerformanceFields, Status, Tool};
    use crate::validator::validate_batch;
    use serde_json::json;

    fn standard_event(tool: &str, version: &str, rt: u64, status: &str, hit: bool) -> serde_json::Value {
        json!({
            "version": version,
            "tool": tool,
            "status": status,
            "timestamp_hour": "2025-11-11T14:00:00Z",
            "analytics_level": "standard",
            "response_time_ms": rt,
            "service": "noaa",
            "cache_hit": hit,
            "retry_count": 0,
            "error_type": if status == "error" { Some("TIMEOUT") } else { None },
        })
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let values = vec![10, 20, 30, 40];
        // rank = 0.5 * 3 = 1.5 -> interpolate between index 1 (20) and 2 (30)
        assert_eq!(percentile(&values, 0.5), Some(25.0));
    }

    #[test]
    fn percentile_single_value() {
        assert_eq!(percentile(&[42], 0.95), Some(42.0));
    }

    #[test]
    fn percentile_empty_is_none() {
        assert_eq!(percentile(&[], 0.95), None);
    }

    #[test]
    fn grouping_produces_total_calls_of_one_for_single_event() {
        let batch = json!({ "events": [standard_event("get_forecast", "1.0.0", 100, "success", true)] });
        let events = validate_batch(&batch).unwrap();
        let grouped = group_batch(&events);
        assert_eq!(grouped.hourly.len(), 1);
        assert_eq!(grouped.hourly[0].total_calls, 1);
        assert_eq!(grouped.daily.len(), 1);
        assert_eq!(grouped.daily[0].total_calls, 1);
    }

    #[test]
    fn error_summary_counts_only_error_events_with_error_type() {
        let batch = json!({ "events": [
            standard_event("get_forecast", "1.0.0", 100, "error", false),
            standard_event("get_forecast", "1.0.1", 100, "error", false),
            standard_event("get_forecast", "1.0.0", 100, "success", true),
        ]});
        let events = validate_batch(&batch).unwrap();
        let grouped = group_batch(&events);
        assert_eq!(grouped.errors.len(), 1);
        assert_eq!(grouped.errors[0].count, 2);
        assert_eq!(grouped.errors[0].affected_versions.len(), 2);
    }

    #[test]
    fn aggregation_is_commutative_under_arbitrary_subdivision() {
        let raw_events = vec![
            standard_event("get_forecast", "1.0.0", 100, "success", true),
            standard_event("get_forecast", "1.0.0", 200, "success", false),
            standard_event("get_forecast", "1.0.0", 300, "error", true),
        ];

        // Process as a single batch.
        let whole_batch = json!({ "events": raw_events.clone() });
        let whole_events = validate_batch(&whole_batch).unwrap();
        let whole_grouped = group_batch(&whole_events);
        let whole_row = whole_grouped.hourly[0].clone();

        // Process as two sub-batches, merged incrementally.
        let (first, rest) = raw_events.split_at(1);
        let first_events = validate_batch(&json!({ "events": first })).unwrap();
        let rest_events = validate_batch(&json!({ "events": rest })).unwrap();

        let first_row = group_batch(&first_events).hourly.remove(0);
        let merged = HourlyAggregateRow::merge(Some(&first_row), group_batch(&rest_events).hourly.remove(0));

        assert_eq!(merged.total_calls, whole_row.total_calls);
        assert_eq!(merged.success_calls, whole_row.success_calls);
        assert_eq!(merged.error_calls, whole_row.error_calls);
        assert_eq!(merged.cache_hit_count, whole_row.cache_hit_count);
        assert_eq!(merged.cache_miss_count, whole_row.cache_miss_count);
    }

    #[test]
    fn daily_per_service_success_rate_not_aliased_from_overall() {
        let raw_events = vec![
            standard_event("get_forecast", "1.0.0", 100, "success", true),
            standard_event("get_forecast", "1.0.0", 100, "error", true),
        ];
        let events = validate_batch(&json!({ "events": raw_events })).unwrap();
        let grouped = group_batch(&events);
        let row = &grouped.daily[0];
        // overall success rate is 0.5, but the only service present (noaa)
        // carries both events, so its rate must independently equal 0.5 —
        // proving it's computed per-service rather than copied.
        assert_eq!(row.noaa.calls, 2);
        assert_eq!(row.noaa.success_rate(), Some(0.5));
    }
}
