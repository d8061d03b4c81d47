//! The batch validator.
//!
//! Pure, deterministic, allocation-bounded, no I/O. Operates on an
//! already-parsed JSON batch object and either returns the normalized, typed
//! batch or a structured list of failures citing the offending element
//! index and the rule that failed.

use crate::event::{
    AnalyticsLevel, Country, Event, EventCommon, EventDetailed, EventMinimal, EventStandard,
    PerformanceFields, Service, Status, Tool,
};
use crate::pii;
use crate::{SessionIdHash, Timestamp};
use serde_json::Value;

/// Maximum number of events accepted in a single batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Maximum lengths for string fields.
const MAX_VERSION_LEN: usize = 20;
const MAX_TOOL_LEN: usize = 50;
const MAX_ERROR_TYPE_LEN: usize = 100;

/// A single validation failure, citing the offending element (`None` for a
/// batch-level failure such as an empty or oversized batch) and a
/// machine-checkable rule name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub index: Option<usize>,
    pub rule: &'static str,
    pub message: String,
}

impl ValidationFailure {
    fn batch(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            index: None,
            rule,
            message: message.into(),
        }
    }

    fn event(index: usize, rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            rule,
            message: message.into(),
        }
    }

    /// Render as the `"Event {i}: {message}"` form used in the `details`
    /// array of the `validation_failed` error body.
    pub fn display(&self) -> String {
        match self.index {
            Some(i) => format!("Event {}: {}", i, self.message),
            None => self.message.clone(),
        }
    }
}

/// Validates a raw JSON batch object against the full rule set, returning
/// the normalized typed events on success or the complete list of failures
/// (not just the first) on failure.
pub fn validate_batch(batch: &Value) -> Result<Vec<Event>, Vec<ValidationFailure>> {
    let events = match batch.get("events").and_then(Value::as_array) {
        Some(arr) => arr,
        None => {
            return Err(vec![ValidationFailure::batch(
                "schema",
                "top-level field 'events' must be an array",
            )])
        }
    };

    if events.is_empty() {
        return Err(vec![ValidationFailure::batch(
            "batch_size",
            "batch must contain at least 1 event",
        )]);
    }
    if events.len() > MAX_BATCH_SIZE {
        return Err(vec![ValidationFailure::batch(
            "batch_size",
            format!("batch exceeds maximum of {MAX_BATCH_SIZE} events"),
        )]);
    }

    let mut failures = Vec::new();
    let mut validated = Vec::with_capacity(events.len());

    for (index, raw_event) in events.iter().enumerate() {
        match validate_one(index, raw_event) {
            Ok(event) => validated.push(event),
            Err(mut event_failures) => failures.append(&mut event_failures),
        }
    }

    if failures.is_empty() {
        Ok(validated)
    } else {
        Err(failures)
    }
}

fn validate_one(index: usize, raw: &Value) -> Result<Event, Vec<ValidationFailure>> {
    // The PII sweep runs before any schema check.
    if let Some(_key) = pii::sweep(raw) {
        return Err(vec![ValidationFailure::event(
            index,
            "pii",
            "contains PII (rejected for privacy)",
        )]);
    }

    let mut failures = Vec::new();

    let version = string_field(raw, "version", &mut failures, index);
    if let Some(v) = &version {
        if v.len() > MAX_VERSION_LEN {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                format!("'version' exceeds {MAX_VERSION_LEN} characters"),
            ));
        }
    }

    let tool_str = string_field(raw, "tool", &mut failures, index);
    let tool = tool_str.as_deref().and_then(|s| s.parse::<Tool>().ok());
    if let Some(s) = &tool_str {
        if s.len() > MAX_TOOL_LEN {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                format!("'tool' exceeds {MAX_TOOL_LEN} characters"),
            ));
        } else if tool.is_none() {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                format!("'tool' is not a recognized value: {s}"),
            ));
        }
    }

    let status_str = string_field(raw, "status", &mut failures, index);
    let status = status_str.as_deref().and_then(|s| s.parse::<Status>().ok());
    if status_str.is_some() && status.is_none() {
        failures.push(ValidationFailure::event(
            index,
            "schema",
            "'status' must be one of: success, error",
        ));
    }

    let level_str = string_field(raw, "analytics_level", &mut failures, index);
    let level = level_str
        .as_deref()
        .and_then(|s| s.parse::<AnalyticsLevel>().ok());
    if level_str.is_some() && level.is_none() {
        failures.push(ValidationFailure::event(
            index,
            "schema",
            "'analytics_level' must be one of: minimal, standard, detailed",
        ));
    }

    // timestamp_hour must parse and be exactly on the hour.
    let timestamp = match raw.get("timestamp_hour").and_then(Value::as_str) {
        Some(s) => match Timestamp::from_rfc3339(s) {
            Ok(ts) if ts.is_hour_aligned() => Some(ts),
            Ok(_) => {
                failures.push(ValidationFailure::event(
                    index,
                    "hour_alignment",
                    "'timestamp_hour' must be rounded to the hour",
                ));
                None
            }
            Err(_) => {
                failures.push(ValidationFailure::event(
                    index,
                    "schema",
                    "'timestamp_hour' is not a valid ISO-8601 instant",
                ));
                None
            }
        },
        None => {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                "'timestamp_hour' is required",
            ));
            None
        }
    };

    // Bail early on missing required base fields; further checks need them.
    let (Some(version), Some(tool), Some(status), Some(level), Some(timestamp)) =
        (version, tool, status, level, timestamp)
    else {
        return Err(failures);
    };

    let common = EventCommon {
        version,
        tool,
        status,
        timestamp_hour: timestamp,
    };

    let event = match level {
        AnalyticsLevel::Minimal => {
            // Minimal events are never required to carry error_type, even on status=error.
            if failures.is_empty() {
                Some(Event::Minimal(EventMinimal { common }))
            } else {
                None
            }
        }
        AnalyticsLevel::Standard => {
            validate_performance_fields(index, raw, status, &mut failures).map(|performance| {
                Event::Standard(EventStandard { common, performance })
            })
        }
        AnalyticsLevel::Detailed => {
            let performance = validate_performance_fields(index, raw, status, &mut failures);
            let parameters = raw
                .get("parameters")
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<std::collections::HashMap<_, _>>()
                })
                .unwrap_or_default();
            let session_id = match raw.get("session_id").and_then(Value::as_str) {
                Some(s) => match SessionIdHash::new(s) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        failures.push(ValidationFailure::event(index, "schema", e.to_string()));
                        None
                    }
                },
                None => {
                    failures.push(ValidationFailure::event(
                        index,
                        "schema",
                        "'session_id' is required for detailed events",
                    ));
                    None
                }
            };
            let sequence_number = match raw.get("sequence_number").and_then(Value::as_u64) {
                Some(n) => Some(n),
                None => {
                    failures.push(ValidationFailure::event(
                        index,
                        "schema",
                        "'sequence_number' is required for detailed events",
                    ));
                    None
                }
            };

            match (performance, session_id, sequence_number) {
                (Some(performance), Some(session_id), Some(sequence_number)) => {
                    Some(Event::Detailed(EventDetailed {
                        common,
                        performance,
                        parameters,
                        session_id,
                        sequence_number,
                    }))
                }
                _ => None,
            }
        }
    };

    match event {
        Some(event) if failures.is_empty() => Ok(event),
        _ => Err(failures),
    }
}

fn validate_performance_fields(
    index: usize,
    raw: &Value,
    status: Status,
    failures: &mut Vec<ValidationFailure>,
) -> Option<PerformanceFields> {
    let response_time_ms = match raw.get("response_time_ms").and_then(Value::as_u64) {
        Some(n) if n <= 120_000 => Some(n as u32),
        Some(_) => {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                "'response_time_ms' must be between 0 and 120000",
            ));
            None
        }
        None => {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                "'response_time_ms' is required",
            ));
            None
        }
    };

    let service_str = raw.get("service").and_then(Value::as_str);
    let service = service_str.and_then(|s| s.parse::<Service>().ok());
    match (service_str, service) {
        (Some(_), None) => failures.push(ValidationFailure::event(
            index,
            "schema",
            "'service' must be one of: noaa, openmeteo",
        )),
        (None, _) => failures.push(ValidationFailure::event(
            index,
            "schema",
            "'service' is required",
        )),
        _ => {}
    }

    let cache_hit = match raw.get("cache_hit").and_then(Value::as_bool) {
        Some(b) => Some(b),
        None => {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                "'cache_hit' is required",
            ));
            None
        }
    };

    let retry_count = match raw.get("retry_count").and_then(Value::as_u64) {
        Some(n) if n <= 10 => Some(n as u8),
        Some(_) => {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                "'retry_count' must be between 0 and 10",
            ));
            None
        }
        None => {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                "'retry_count' is required",
            ));
            None
        }
    };

    let country = match raw.get("country").and_then(Value::as_str) {
        Some(s) => match Country::parse(s) {
            Some(c) => Some(c),
            None => {
                failures.push(ValidationFailure::event(
                    index,
                    "schema",
                    "'country' must be exactly 2 uppercase letters",
                ));
                None
            }
        },
        None => None,
    };

    let error_type = raw
        .get("error_type")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    if status.is_error() {
        match &error_type {
            Some(s) if !s.is_empty() => {
                if s.len() > MAX_ERROR_TYPE_LEN {
                    failures.push(ValidationFailure::event(
                        index,
                        "schema",
                        format!("'error_type' exceeds {MAX_ERROR_TYPE_LEN} characters"),
                    ));
                }
            }
            _ => failures.push(ValidationFailure::event(
                index,
                "schema",
                "'error_type' is required when status is 'error'",
            )),
        }
    }

    match (response_time_ms, cache_hit, retry_count) {
        (Some(response_time_ms), Some(cache_hit), Some(retry_count)) if service.is_some() => {
            Some(PerformanceFields {
                response_time_ms,
                service: service.unwrap(),
                cache_hit,
                retry_count,
                country,
                error_type,
            })
        }
        _ => None,
    }
}

fn string_field(
    raw: &Value,
    field: &'static str,
    failures: &mut Vec<ValidationFailure>,
    index: usize,
) -> Option<String> {
    match raw.get(field).and_then(Value::as_str) {
        Some(s) => Some(s.to_string()),
        None => {
            failures.push(ValidationFailure::event(
                index,
                "schema",
                format!("'{field}' is required"),
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_minimal() -> Value {
        json!({
            "version": "1.0.0",
            "tool": "get_forecast",
            "status": "success",
            "timestamp_hour": "2025-11-11T14:00:00Z",
            "analytics_level": "minimal",
        })
    }

    #[test]
    fn accepts_valid_minimal_event() {
        let batch = json!({ "events": [valid_minimal()] });
        let result = validate_batch(&batch).expect("should validate");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].level(), AnalyticsLevel::Minimal);
    }

    #[test]
    fn rejects_empty_batch() {
        let batch = json!({ "events": [] });
        let err = validate_batch(&batch).unwrap_err();
        assert_eq!(err[0].rule, "batch_size");
    }

    #[test]
    fn rejects_batch_over_100() {
        let events: Vec<Value> = (0..101).map(|_| valid_minimal()).collect();
        let batch = json!({ "events": events });
        let err = validate_batch(&batch).unwrap_err();
        assert_eq!(err[0].rule, "batch_size");
    }

    #[test]
    fn rejects_pii_without_echoing_value() {
        let mut event = valid_minimal();
        event["latitude"] = json!(40.7);
        let batch = json!({ "events": [event] });
        let err = validate_batch(&batch).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].rule, "pii");
        assert_eq!(err[0].display(), "Event 0: contains PII (rejected for privacy)");
        assert!(!err[0].display().contains("40.7"));
    }

    #[test]
    fn rejects_non_hour_aligned_timestamp() {
        let mut event = valid_minimal();
        event["timestamp_hour"] = json!("2025-11-11T14:05:00Z");
        let batch = json!({ "events": [event] });
        let err = validate_batch(&batch).unwrap_err();
        assert_eq!(err[0].rule, "hour_alignment");
    }

    #[test]
    fn rejects_unknown_enum_values() {
        let mut event = valid_minimal();
        event["tool"] = json!("not_a_real_tool");
        let batch = json!({ "events": [event] });
        let err = validate_batch(&batch).unwrap_err();
        assert!(err.iter().any(|f| f.rule == "schema" && f.message.contains("tool")));
    }

    #[test]
    fn requires_error_type_when_status_error_for_standard() {
        let event = json!({
            "version": "1.0.0",
            "tool": "get_forecast",
            "status": "error",
            "timestamp_hour": "2025-11-11T14:00:00Z",
            "analytics_level": "standard",
            "response_time_ms": 100,
            "service": "noaa",
            "cache_hit": false,
            "retry_count": 0,
        });
        let batch = json!({ "events": [event] });
        let err = validate_batch(&batch).unwrap_err();
        assert!(err.iter().any(|f| f.message.contains("error_type")));
    }

    #[test]
    fn minimal_error_event_does_not_require_error_type() {
        let mut event = valid_minimal();
        event["status"] = json!("error");
        let batch = json!({ "events": [event] });
        assert!(validate_batch(&batch).is_ok());
    }

    #[test]
    fn accepts_full_detailed_event() {
        let event = json!({
            "version": "1.0.0",
            "tool": "get_forecast",
            "status": "success",
            "timestamp_hour": "2025-11-11T14:00:00Z",
            "analytics_level": "detailed",
            "response_time_ms": 250,
            "service": "openmeteo",
            "cache_hit": true,
            "retry_count": 1,
            "country": "US",
            "parameters": {"units": "metric"},
            "session_id": "0123456789abcdef",
            "sequence_number": 3,
        });
        let batch = json!({ "events": [event] });
        let result = validate_batch(&batch).expect("should validate");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].level(), AnalyticsLevel::Detailed);
    }

    #[test]
    fn collects_multiple_failures_across_batch() {
        let mut bad1 = valid_minimal();
        bad1["tool"] = json!("nope");
        let mut bad2 = valid_minimal();
        bad2["timestamp_hour"] = json!("2025-11-11T14:05:00Z");
        let batch = json!({ "events": [bad1, bad2] });
        let err = validate_batch(&batch).unwrap_err();
        assert!(err.iter().any(|f| f.index == Some(0)));
        assert!(err.iter().any(|f| f.index == Some(1)));
    }
}
