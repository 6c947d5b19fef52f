// src/temporal.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const BEFORE_WEEK_ONE_LABEL: &str = "Before Week 1";
pub const CANONICAL_DATE_FORMAT: &str = "%d-%m-%Y";

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"];

// --- Week index ---

/// Week number relative to the anchor date. The sentinel sorts before every numbered week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum WeekIndex {
    BeforeWeekOne,
    Week(u32),
}

impl WeekIndex {
    pub fn is_numbered(&self) -> bool {
        matches!(self, WeekIndex::Week(_))
    }
}

impl fmt::Display for WeekIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeekIndex::BeforeWeekOne => write!(f, "{}", BEFORE_WEEK_ONE_LABEL),
            WeekIndex::Week(n) => write!(f, "Week {}", n),
        }
    }
}

impl FromStr for WeekIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == BEFORE_WEEK_ONE_LABEL {
            return Ok(WeekIndex::BeforeWeekOne);
        }
        s.strip_prefix("Week ")
            .and_then(|n| n.trim().parse::<u32>().ok())
            .filter(|n| *n >= 1)
            .map(WeekIndex::Week)
            .ok_or_else(|| format!("Invalid week label: '{}'", s))
    }
}

impl From<WeekIndex> for String {
    fn from(week: WeekIndex) -> Self {
        week.to_string()
    }
}

impl TryFrom<String> for WeekIndex {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// `floor((date - anchor).days / 7) + 1`, or the sentinel for dates before the anchor.
pub fn week_index(date: NaiveDate, anchor: NaiveDate) -> WeekIndex {
    let days = (date - anchor).num_days();
    if days < 0 {
        WeekIndex::BeforeWeekOne
    } else {
        WeekIndex::Week((days / 7) as u32 + 1)
    }
}

// --- Date parsing ---

/// Parses a formatted or serialized-numeric activity date.
///
/// Formatted strings are tried against `formats` in order, then against a few
/// datetime layouts. Digit-only strings are classified by length: epoch
/// nanoseconds, microseconds, milliseconds or seconds, and short values as a
/// spreadsheet day serial.
pub fn parse_activity_date(raw: &str, formats: &[String]) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(datetime.date());
        }
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        return parse_numeric_date(raw);
    }

    // Serialized spreadsheet serials may carry a time fraction ("45672.5").
    if let Ok(serial) = raw.parse::<f64>() {
        if serial.is_finite() && serial >= 1.0 && serial < 100_000.0 {
            return excel_serial_date(serial.floor() as i64);
        }
    }

    None
}

fn parse_numeric_date(digits: &str) -> Option<NaiveDate> {
    let value: i64 = digits.parse().ok()?;
    let datetime = match digits.len() {
        17..=19 => Some(DateTime::from_timestamp_nanos(value)),
        14..=16 => DateTime::from_timestamp_micros(value),
        12..=13 => DateTime::from_timestamp_millis(value),
        9..=10 => DateTime::from_timestamp(value, 0),
        1..=5 => return excel_serial_date(value),
        _ => None,
    };
    datetime.map(|dt| dt.date_naive())
}

fn excel_serial_date(days: i64) -> Option<NaiveDate> {
    if days < 1 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(days))
}

pub fn format_canonical(date: NaiveDate) -> String {
    date.format(CANONICAL_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn formats() -> Vec<String> {
        ["%m/%d/%Y", "%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"]
            .iter()
            .map(|f| f.to_string())
            .collect()
    }

    #[test]
    fn week_index_from_anchor() {
        let anchor = date(2024, 12, 30);
        assert_eq!(week_index(anchor, anchor), WeekIndex::Week(1));
        assert_eq!(week_index(date(2025, 1, 5), anchor), WeekIndex::Week(1));
        assert_eq!(week_index(date(2025, 1, 6), anchor), WeekIndex::Week(2));
        assert_eq!(week_index(date(2025, 1, 15), anchor), WeekIndex::Week(3));
        assert_eq!(week_index(date(2024, 12, 29), anchor), WeekIndex::BeforeWeekOne);
        assert_eq!(week_index(date(2023, 1, 1), anchor), WeekIndex::BeforeWeekOne);
    }

    #[test]
    fn week_index_is_at_least_one_on_or_after_anchor() {
        let anchor = date(2024, 12, 30);
        for offset in 0..400 {
            let d = anchor + Duration::days(offset);
            let expected = (offset / 7) as u32 + 1;
            assert_eq!(week_index(d, anchor), WeekIndex::Week(expected), "offset {}", offset);
        }
    }

    #[test]
    fn sentinel_sorts_first_and_round_trips_label() {
        let mut weeks = vec![WeekIndex::Week(10), WeekIndex::BeforeWeekOne, WeekIndex::Week(2)];
        weeks.sort();
        assert_eq!(weeks, vec![WeekIndex::BeforeWeekOne, WeekIndex::Week(2), WeekIndex::Week(10)]);
        assert_eq!("Before Week 1".parse::<WeekIndex>(), Ok(WeekIndex::BeforeWeekOne));
        assert_eq!("Week 12".parse::<WeekIndex>(), Ok(WeekIndex::Week(12)));
        assert!("Week 0".parse::<WeekIndex>().is_err());
        assert_eq!(serde_json::to_string(&WeekIndex::Week(3)).unwrap(), "\"Week 3\"");
    }

    #[test]
    fn formatted_dates_follow_configured_order() {
        let formats = formats();
        // Day > 12 only fits the day-first layout.
        assert_eq!(parse_activity_date("15/01/2025", &formats), Some(date(2025, 1, 15)));
        // Ambiguous: US layout wins.
        assert_eq!(parse_activity_date("01/02/2025", &formats), Some(date(2025, 1, 2)));
        assert_eq!(parse_activity_date("2025-01-15", &formats), Some(date(2025, 1, 15)));
        assert_eq!(parse_activity_date("2025-01-15 00:00:00", &formats), Some(date(2025, 1, 15)));
        assert_eq!(parse_activity_date("15-01-2025", &formats), Some(date(2025, 1, 15)));
    }

    #[test]
    fn numeric_dates_are_classified_by_length() {
        let formats = formats();
        // 2025-01-15T00:00:00Z
        assert_eq!(parse_activity_date("1736899200000000000", &formats), Some(date(2025, 1, 15)));
        assert_eq!(parse_activity_date("1736899200000", &formats), Some(date(2025, 1, 15)));
        assert_eq!(parse_activity_date("1736899200", &formats), Some(date(2025, 1, 15)));
        assert_eq!(parse_activity_date("45672", &formats), Some(date(2025, 1, 15)));
    }

    #[test]
    fn unparsable_dates_are_none() {
        let formats = formats();
        assert_eq!(parse_activity_date("", &formats), None);
        assert_eq!(parse_activity_date("not a date", &formats), None);
        assert_eq!(parse_activity_date("13/13/2025", &formats), None);
        assert_eq!(parse_activity_date("1234567", &formats), None);
    }

    #[test]
    fn canonical_format_is_day_first() {
        assert_eq!(format_canonical(date(2025, 1, 5)), "05-01-2025");
    }
}
