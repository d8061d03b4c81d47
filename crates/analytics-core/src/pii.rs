//! The PII sweep: a recursive, depth-limited scan that rejects any object
//! containing a key drawn from a closed set of personally-identifying field
//! names.
//!
//! This runs before schema validation, so that a PII leak in an otherwise
//! malformed event is still caught and reported as a privacy violation, not
//! masked by an unrelated schema error.

use serde_json::Value;

/// Maximum recursion depth the sweep will walk. A value nested deeper than
/// this is not inspected.
pub const MAX_SWEEP_DEPTH: usize = 10;

/// Closed set of key names that must never appear in an event at any
/// nesting depth.
pub const PII_KEYS: &[&str] = &[
    "latitude",
    "longitude",
    "lat",
    "lon",
    "location",
    "user_id",
    "ip",
    "email",
    "name",
    "address",
    "phone",
    "city",
    "zip",
    "postal",
];

fn is_pii_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    PII_KEYS.iter().any(|pii| *pii == lower)
}

/// Returns the first PII key name found in `value`, walking objects and
/// arrays up to [`MAX_SWEEP_DEPTH`]. `None` means the value is clean.
///
/// The sweep never returns the offending value — only the key name — so
/// callers can build an error message that doesn't echo the rejected data.
pub fn find_pii_key(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_SWEEP_DEPTH {
        return None;
    }

    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_pii_key(key) {
                    return Some(key.clone());
                }
                if let Some(found) = find_pii_key(nested, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => {
            for item in items {
                if let Some(found) = find_pii_key(item, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        _ => None,
    }
}

/// Convenience wrapper starting the sweep at depth 0.
pub fn sweep(value: &Value) -> Option<String> {
    find_pii_key(value, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_event_passes() {
        let event = json!({
            "version": "1.0.0",
            "tool": "get_forecast",
            "status": "success",
            "timestamp_hour": "2025-11-11T14:00:00Z",
            "analytics_level": "minimal",
        });
        assert_eq!(sweep(&event), None);
    }

    #[test]
    fn top_level_pii_key_detected() {
        let event = json!({
            "version": "1.0.0",
            "latitude": 40.7,
        });
        assert_eq!(sweep(&event).as_deref(), Some("latitude"));
    }

    #[test]
    fn nested_pii_key_detected() {
        let event = json!({
            "parameters": {
                "nested": {
                    "user_id": "abc123"
                }
            }
        });
        assert_eq!(sweep(&event).as_deref(), Some("user_id"));
    }

    #[test]
    fn pii_key_in_array_detected() {
        let event = json!({
            "parameters": {
                "items": [ {"email": "a@b.com"} ]
            }
        });
        assert_eq!(sweep(&event).as_deref(), Some("email"));
    }

    #[test]
    fn key_name_matching_is_case_insensitive() {
        let event = json!({ "Email": "a@b.com" });
        assert_eq!(sweep(&event).as_deref(), Some("Email"));
    }

    #[test]
    fn depth_beyond_limit_is_not_inspected() {
        let mut value = json!({"user_id": "leaf"});
        for _ in 0..MAX_SWEEP_DEPTH + 5 {
            value = json!({ "wrapper": value });
        }
        assert_eq!(sweep(&value), None);
    }

    #[test]
    fn similarly_named_but_safe_keys_pass() {
        let event = json!({ "nameplate": "x", "citywide": "y" });
        assert_eq!(sweep(&event), None);
    }
}
