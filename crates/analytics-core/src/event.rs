//! The event schema: a discriminated union over `analytics_level`, plus the
//! closed enums schema validation checks incoming events against.

use crate::{SessionIdHash, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of tool identifiers exposed by the weather MCP server this
/// service collects analytics for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    GetForecast,
    GetCurrentWeather,
    GetAlerts,
    GetHistorical,
    SearchLocations,
    GetRadarImagery,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetForecast => "get_forecast",
            Self::GetCurrentWeather => "get_current_weather",
            Self::GetAlerts => "get_alerts",
            Self::GetHistorical => "get_historical",
            Self::SearchLocations => "search_locations",
            Self::GetRadarImagery => "get_radar_imagery",
        }
    }

    pub fn all() -> &'static [Tool] {
        &[
            Self::GetForecast,
            Self::GetCurrentWeather,
            Self::GetAlerts,
            Self::GetHistorical,
            Self::SearchLocations,
            Self::GetRadarImagery,
        ]
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tool {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_forecast" => Ok(Self::GetForecast),
            "get_current_weather" => Ok(Self::GetCurrentWeather),
            "get_alerts" => Ok(Self::GetAlerts),
            "get_historical" => Ok(Self::GetHistorical),
            "search_locations" => Ok(Self::SearchLocations),
            "get_radar_imagery" => Ok(Self::GetRadarImagery),
            _ => Err(()),
        }
    }
}

/// Closed set of upstream weather data providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Noaa,
    Openmeteo,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noaa => "noaa",
            Self::Openmeteo => "openmeteo",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Service {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noaa" => Ok(Self::Noaa),
            "openmeteo" => Ok(Self::Openmeteo),
            _ => Err(()),
        }
    }
}

/// Call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

/// The `analytics_level` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsLevel {
    Minimal,
    Standard,
    Detailed,
}

impl AnalyticsLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Detailed => "detailed",
        }
    }
}

impl fmt::Display for AnalyticsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalyticsLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(Self::Minimal),
            "standard" => Ok(Self::Standard),
            "detailed" => Ok(Self::Detailed),
            _ => Err(()),
        }
    }
}

/// ISO 3166-1 alpha-2 country code: exactly two uppercase ASCII letters.
/// Only the shape is checked here, not membership in the real ISO list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Country([u8; 2]);

impl Country {
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() == 2 && bytes.iter().all(|b| b.is_ascii_uppercase()) {
            Some(Self([bytes[0], bytes[1]]))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("ASCII uppercase bytes are valid UTF-8")
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Country {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Country {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Country::parse(&s).ok_or_else(|| serde::de::Error::custom("must be 2 uppercase letters"))
    }
}

/// Fields shared by every analytics level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCommon {
    pub version: String,
    pub tool: Tool,
    pub status: Status,
    pub timestamp_hour: Timestamp,
}

/// Additional fields present at `standard` and `detailed` levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceFields {
    pub response_time_ms: u32,
    pub service: Service,
    pub cache_hit: bool,
    pub retry_count: u8,
    pub country: Option<Country>,
    pub error_type: Option<String>,
}

/// The bare (`minimal`) event case: no optional fields at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMinimal {
    #[serde(flatten)]
    pub common: EventCommon,
}

/// The `standard` event case: common fields plus performance fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStandard {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(flatten)]
    pub performance: PerformanceFields,
}

/// The `detailed` event case: standard fields plus anonymous parameters and
/// session tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDetailed {
    #[serde(flatten)]
    pub common: EventCommon,
    #[serde(flatten)]
    pub performance: PerformanceFields,
    pub parameters: HashMap<String, serde_json::Value>,
    pub session_id: SessionIdHash,
    pub sequence_number: u64,
}

/// A validated, normalized event, tagged by its analytics level: a tagged
/// variant with three cases sharing a common base.
///
/// Downstream code (the aggregator) dispatches through [`Event::common`]
/// and [`Event::performance`] rather than matching on the variant directly,
/// except where level-specific behavior (e.g. whether `error_type` is
/// required) genuinely differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "analytics_level", rename_all = "lowercase")]
pub enum Event {
    Minimal(EventMinimal),
    Standard(EventStandard),
    Detailed(EventDetailed),
}

impl Event {
    pub fn level(&self) -> AnalyticsLevel {
        match self {
            Self::Minimal(_) => AnalyticsLevel::Minimal,
            Self::Standard(_) => AnalyticsLevel::Standard,
            Self::Detailed(_) => AnalyticsLevel::Detailed,
        }
    }

    pub fn common(&self) -> &EventCommon {
        match self {
            Self::Minimal(e) => &e.common,
            Self::Standard(e) => &e.common,
            Self::Detailed(e) => &e.common,
        }
    }

    /// Performance fields, when present (standard/detailed only).
    pub fn performance(&self) -> Option<&PerformanceFields> {
        match self {
            Self::Minimal(_) => None,
            Self::Standard(e) => Some(&e.performance),
            Self::Detailed(e) => Some(&e.performance),
        }
    }

    pub fn response_time_ms(&self) -> Option<u32> {
        self.performance().map(|p| p.response_time_ms)
    }

    pub fn service(&self) -> Option<Service> {
        self.performance().map(|p| p.service)
    }

    pub fn cache_hit(&self) -> Option<bool> {
        self.performance().map(|p| p.cache_hit)
    }

    pub fn retry_count(&self) -> Option<u8> {
        self.performance().map(|p| p.retry_count)
    }

    pub fn country(&self) -> Option<Country> {
        self.performance().and_then(|p| p.country)
    }

    pub fn error_type(&self) -> Option<&str> {
        self.performance().and_then(|p| p.error_type.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Timestamp;

    fn minimal() -> Event {
        Event::Minimal(EventMinimal {
            common: EventCommon {
                version: "1.0.0".to_string(),
                tool: Tool::GetForecast,
                status: Status::Success,
                timestamp_hour: Timestamp::from_rfc3339("2025-11-11T14:00:00Z").unwrap(),
            },
        })
    }

    #[test]
    fn queue_entry_round_trips_through_json_with_level_tag() {
        let event = minimal();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["analytics_level"], "minimal");
        assert_eq!(json["tool"], "get_forecast");

        let restored: Event = serde_json::from_value(json).unwrap();
        assert_eq!(restored.level(), AnalyticsLevel::Minimal);
        assert_eq!(restored.common().tool, Tool::GetForecast);
    }

    #[test]
    fn country_rejects_non_uppercase_or_wrong_length() {
        assert!(Country::parse("us").is_none());
        assert!(Country::parse("USA").is_none());
        assert_eq!(Country::parse("US").unwrap().as_str(), "US");
    }
}
