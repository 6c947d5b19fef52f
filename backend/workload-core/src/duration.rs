// src/duration.rs
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// 1-2 digit hour, exactly 2-digit minute.
static CLOCK_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,2}):(\d{2})\s*$").expect("valid duration regex"));

/// A duration cell converted to fractional hours, keeping the raw text for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDuration {
    pub hours: f64,
    pub raw: String,
    /// True when the raw value could not be read and `hours` is the zero default.
    pub defaulted: bool,
}

/// Numeric text is taken as hours, `H:MM`/`HH:MM` as `hours + minutes / 60`.
/// Anything else, blanks included, is zero hours and flagged as defaulted.
pub fn parse_duration(raw: &str) -> ParsedDuration {
    let hours = parse_hours(raw);
    ParsedDuration {
        hours: hours.unwrap_or(0.0),
        raw: raw.to_string(),
        defaulted: hours.is_none(),
    }
}

fn parse_hours(raw: &str) -> Option<f64> {
    if let Some(caps) = CLOCK_DURATION.captures(raw) {
        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        return Some(hours + minutes / 60.0);
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|h| h.is_finite() && *h >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_durations_are_hours_plus_minutes() {
        assert_eq!(parse_duration("8:30").hours, 8.5);
        assert_eq!(parse_duration("08:15").hours, 8.25);
        assert_eq!(parse_duration(" 0:45 ").hours, 0.75);
        assert_eq!(parse_duration("12:00").hours, 12.0);
        assert!(!parse_duration("8:30").defaulted);
    }

    #[test]
    fn every_clock_value_matches_formula() {
        for h in 0..100u32 {
            for m in [0u32, 1, 15, 30, 59] {
                let raw = format!("{}:{:02}", h, m);
                let expected = h as f64 + m as f64 / 60.0;
                assert_eq!(parse_duration(&raw).hours, expected, "raw {}", raw);
            }
        }
    }

    #[test]
    fn numeric_values_are_hours() {
        assert_eq!(parse_duration("7.5").hours, 7.5);
        assert_eq!(parse_duration("3").hours, 3.0);
        assert!(!parse_duration("7.5").defaulted);
    }

    #[test]
    fn malformed_values_default_to_zero_and_keep_raw() {
        for raw in ["", "   ", "abc", "8:3", "123:00", "8:300", "-2", "NaN", "8h30"] {
            let parsed = parse_duration(raw);
            assert_eq!(parsed.hours, 0.0, "raw {:?}", raw);
            assert!(parsed.defaulted, "raw {:?} should be flagged", raw);
            assert_eq!(parsed.raw, raw);
        }
    }
}
