use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{ServiceError, ServiceResult};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Inclusive bounds of one calendar day, formatted as stored timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRange {
    pub start: String,
    pub end: String,
}

impl DayRange {
    pub fn of(day: NaiveDate) -> Self {
        Self::spanning(day, day)
    }

    /// `[first 00:00:00.000, last 23:59:59.999]`, each end normalized on its own.
    pub fn spanning(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            start: format_timestamp(day_start(first)),
            end: format_timestamp(day_end(last)),
        }
    }
}

pub fn day_start(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

pub fn day_end(day: NaiveDate) -> NaiveDateTime {
    // 23:59:59.999 is always representable.
    day.and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| day.and_time(NaiveTime::MIN))
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Local::now().naive_local())
}

/// Accepts `YYYY-MM-DD` or any ISO-8601 timestamp; only the calendar day is kept.
pub fn parse_day(raw: &str) -> ServiceResult<NaiveDate> {
    let t = raw.trim();
    let head = t.get(..10).unwrap_or(t);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|_| {
        ServiceError::bad_params_with(
            "date must be YYYY-MM-DD",
            serde_json::json!({ "value": raw }),
        )
    })
}

/// Stored form of a user-supplied date: the day at midnight.
pub fn day_timestamp(day: NaiveDate) -> String {
    format_timestamp(day_start(day))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_range_covers_whole_day() {
        let d = NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
        let r = DayRange::of(d);
        assert_eq!(r.start, "2024-06-03T00:00:00.000");
        assert_eq!(r.end, "2024-06-03T23:59:59.999");
    }

    #[test]
    fn spanning_normalizes_each_end() {
        let a = NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
        let b = NaiveDate::from_ymd_opt(2024, 6, 5).expect("date");
        let r = DayRange::spanning(a, b);
        assert_eq!(r.start, "2024-06-03T00:00:00.000");
        assert_eq!(r.end, "2024-06-05T23:59:59.999");
    }

    #[test]
    fn parse_day_accepts_timestamps() {
        let d = parse_day("2024-06-03T08:15:00.000Z").expect("parse");
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 6, 3).expect("date"));
        assert!(parse_day("03/06/2024").is_err());
        assert!(parse_day("").is_err());
    }

    #[test]
    fn stored_timestamps_sort_chronologically() {
        let d = NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
        let r = DayRange::of(d);
        let mid = "2024-06-03T12:00:00.000".to_string();
        assert!(r.start <= mid && mid <= r.end);
        assert!("2024-06-04T00:00:00.000".to_string() > r.end);
    }
}
