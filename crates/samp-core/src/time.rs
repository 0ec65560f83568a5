//! Microsecond time tags.
//!
//! Time tags are `i64` microseconds since the Unix epoch, always UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::time::Duration;

use crate::error::SampleError;
use crate::limits::USECS_PER_SEC;

/// Formats tried, in order, by [`parse_time`].
const TIME_FORMATS: &[&str] = &[
    "%Y %m %d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y %b %d %H:%M:%S%.f",
];

/// Convert a time tag to a `DateTime`, if it is in chrono's range.
#[must_use]
pub fn to_datetime(usecs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(usecs)
}

/// Time tag of a `DateTime`.
#[must_use]
pub fn from_datetime(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

/// Status-line rendering, e.g. `2024 03 05 12:00:01.250`.
#[must_use]
pub fn format_usecs(usecs: i64) -> String {
    match to_datetime(usecs) {
        Some(dt) => dt.format("%Y %m %d %H:%M:%S%.3f").to_string(),
        None => format!("{usecs}us"),
    }
}

/// Render a time tag with a `strftime` pattern.
#[must_use]
pub fn format_with(usecs: i64, pattern: &str) -> String {
    match to_datetime(usecs) {
        Some(dt) => dt.format(pattern).to_string(),
        None => format!("{usecs}"),
    }
}

/// Parse a UTC time.
///
/// Accepts RFC 3339, `YYYY mm dd HH:MM:SS[.fff]`, `YYYY-mm-ddTHH:MM:SS[.fff]`,
/// `YYYY-mm-dd HH:MM:SS[.fff]` and a bare `YYYY-mm-dd`.
pub fn parse_time(text: &str) -> Result<i64, SampleError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_micros());
    }
    for format in TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc().timestamp_micros());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().timestamp_micros());
        }
    }
    Err(SampleError::TimeParse(text.to_string()))
}

/// Parse a time from a file name built with a `strftime` pattern.
#[must_use]
pub fn parse_with(text: &str, pattern: &str) -> Option<i64> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
        return Some(naive.and_utc().timestamp_micros());
    }
    // Patterns without time-of-day fields name whole days.
    NaiveDate::parse_from_str(text, pattern)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_micros())
}

/// A duration in microseconds, saturating at `i64::MAX`.
#[must_use]
pub fn duration_usecs(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Round a time tag down to a multiple of `step_usecs`.
#[must_use]
pub fn floor_to(usecs: i64, step_usecs: i64) -> i64 {
    if step_usecs <= 0 {
        return usecs;
    }
    usecs.div_euclid(step_usecs) * step_usecs
}

/// Seconds as microseconds.
#[must_use]
pub const fn secs(s: i64) -> i64 {
    s * USECS_PER_SEC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats_agree() {
        let expected = parse_time("2024-03-05T12:00:01Z").unwrap();
        assert_eq!(parse_time("2024 03 05 12:00:01").unwrap(), expected);
        assert_eq!(parse_time("2024-03-05 12:00:01").unwrap(), expected);
        assert_eq!(parse_time("2024-03-05T12:00:01").unwrap(), expected);
        assert_eq!(
            parse_time("2024 03 05 12:00:01.5").unwrap(),
            expected + 500_000
        );
        assert_eq!(
            parse_time("2024-03-05").unwrap(),
            expected - secs(12 * 3600 + 1)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_time("yesterday"),
            Err(SampleError::TimeParse(_))
        ));
    }

    #[test]
    fn test_format() {
        let t = parse_time("2024-03-05T12:00:01.25Z").unwrap();
        assert_eq!(format_usecs(t), "2024 03 05 12:00:01.250");
        assert_eq!(format_with(t, "isff_%Y%m%d_%H%M%S.dat"), "isff_20240305_120001.dat");
    }

    #[test]
    fn test_parse_with_pattern() {
        let t = parse_with("isff_20240305_120001.dat", "isff_%Y%m%d_%H%M%S.dat").unwrap();
        assert_eq!(t, parse_time("2024-03-05T12:00:01Z").unwrap());
        let day = parse_with("run_20240305.dat", "run_%Y%m%d.dat").unwrap();
        assert_eq!(day, parse_time("2024-03-05").unwrap());
        assert_eq!(parse_with("notes.txt", "run_%Y%m%d.dat"), None);
    }

    #[test]
    fn test_floor_to() {
        assert_eq!(floor_to(secs(3601), secs(3600)), secs(3600));
        assert_eq!(floor_to(-1, secs(1)), -secs(1));
        assert_eq!(floor_to(17, 0), 17);
    }
}
