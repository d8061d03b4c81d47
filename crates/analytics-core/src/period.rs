//! Bounded period-string parsing shared by the stats reader.
//!
//! `parsePeriod` is a DoS guard: it must run, and reject, before any query
//! is planned against the aggregate tables. The bounds (`1..=720` hours,
//! `1..=365` days) keep a single stats request from forcing a full-table
//! scan over the daily aggregates.

use std::fmt;

/// The unit half of a parsed period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    Hours,
    Days,
}

impl PeriodUnit {
    fn suffix(self) -> char {
        match self {
            Self::Hours => 'h',
            Self::Days => 'd',
        }
    }
}

/// A validated `<n>[h|d]` period string, e.g. `24h` or `30d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub amount: u32,
    pub unit: PeriodUnit,
}

impl Period {
    const MAX_HOURS: u32 = 720;
    const MAX_DAYS: u32 = 365;

    /// Total span expressed in hours, used to decide whether the hourly or
    /// daily aggregate table serves the window.
    pub fn as_hours(&self) -> u32 {
        match self.unit {
            PeriodUnit::Hours => self.amount,
            PeriodUnit::Days => self.amount.saturating_mul(24),
        }
    }

    /// Whether this window should be served from the hourly table (true) or
    /// the daily table (false). The hourly table only covers the default
    /// retention horizon, so anything beyond it falls through to daily.
    pub fn fits_hourly_table(&self, hourly_retention_hours: u32) -> bool {
        self.as_hours() <= hourly_retention_hours
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

/// Error returned for a period string that fails the DoS-guard bounds.
/// Maps to the `invalid_period` error taxonomy entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid period: {reason}")]
pub struct InvalidPeriod {
    pub reason: String,
}

fn invalid(reason: impl Into<String>) -> InvalidPeriod {
    InvalidPeriod {
        reason: reason.into(),
    }
}

/// Parses and bounds-checks a period string. Must reject before any query
/// is planned.
pub fn parse_period(raw: &str) -> Result<Period, InvalidPeriod> {
    if raw.is_empty() {
        return Err(invalid("period must not be empty"));
    }

    let mut chars = raw.chars().peekable();
    let mut digits = String::new();
    while let Some(c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(*c);
            chars.next();
        } else {
            break;
        }
    }

    if digits.is_empty() {
        return Err(invalid("period must start with a positive integer"));
    }

    let suffix: String = chars.collect();
    if suffix.len() != 1 {
        return Err(invalid("period must end with exactly one of 'h' or 'd'"));
    }
    let unit = match suffix.chars().next().unwrap() {
        'h' => PeriodUnit::Hours,
        'd' => PeriodUnit::Days,
        other => return Err(invalid(format!("unrecognized period unit '{other}'"))),
    };

    let amount: u32 = digits
        .parse()
        .map_err(|_| invalid("period amount is not a valid positive integer"))?;
    if amount == 0 {
        return Err(invalid("period amount must be positive"));
    }

    let max = match unit {
        PeriodUnit::Hours => Period::MAX_HOURS,
        PeriodUnit::Days => Period::MAX_DAYS,
    };
    if amount > max {
        return Err(invalid(format!(
            "period amount {amount}{} exceeds maximum of {max}{}",
            unit.suffix(),
            unit.suffix()
        )));
    }

    Ok(Period { amount, unit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lower_bound_hours_and_days() {
        assert_eq!(parse_period("1h").unwrap(), Period { amount: 1, unit: PeriodUnit::Hours });
        assert_eq!(parse_period("1d").unwrap(), Period { amount: 1, unit: PeriodUnit::Days });
    }

    #[test]
    fn accepts_upper_bound_hours_and_days() {
        assert!(parse_period("720h").is_ok());
        assert!(parse_period("365d").is_ok());
    }

    #[test]
    fn rejects_over_bound() {
        assert!(parse_period("721h").is_err());
        assert!(parse_period("366d").is_err());
    }

    #[test]
    fn rejects_zero_and_negative() {
        assert!(parse_period("0h").is_err());
        assert!(parse_period("-1h").is_err());
    }

    #[test]
    fn rejects_non_integer_amount() {
        assert!(parse_period("1.5h").is_err());
        assert!(parse_period("h").is_err());
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_period("24m").is_err());
        assert!(parse_period("24").is_err());
    }

    #[test]
    fn as_hours_converts_days() {
        let p = parse_period("2d").unwrap();
        assert_eq!(p.as_hours(), 48);
    }

    #[test]
    fn fits_hourly_table_respects_retention() {
        let p = parse_period("48h").unwrap();
        assert!(p.fits_hourly_table(30 * 24));
        assert!(!p.fits_hourly_table(24));
    }

    #[test]
    fn display_round_trips() {
        let p = parse_period("24h").unwrap();
        assert_eq!(p.to_string(), "24h");
    }
}
