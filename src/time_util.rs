//! Date/duration helpers shared by the catalog and retention engine.
//!
//! Grounded in `util_generic.cc`'s `seconds2hms`, `timeDiff`, `dw`, and
//! `mtimesAreSameDay`, rendered with `chrono` instead of hand-rolled
//! `localtime_r`/`strftime` calls.

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};
use regex::Regex;

/// Derived calendar fields pulled from a unix timestamp, matching the
/// fields `BackupEntry::updateAges` extracts from either the filename or
/// the live mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFields {
    /// Four-digit year.
    pub year: i32,
    /// 1-12.
    pub month: u32,
    /// 1-31.
    pub day: u32,
    /// 0 (Sunday) through 6 (Saturday), matching the original's `dw()`.
    pub day_of_week: u32,
}

/// Decompose a unix timestamp (local time zone) into calendar fields.
pub fn calendar_fields(unix_secs: i64) -> CalendarFields {
    let dt = local_datetime(unix_secs);
    CalendarFields {
        year: dt.year(),
        month: dt.month(),
        day: dt.day(),
        day_of_week: dt.weekday().num_days_from_sunday(),
    }
}

fn local_datetime(unix_secs: i64) -> DateTime<Local> {
    Local
        .timestamp_opt(unix_secs, 0)
        .single()
        .unwrap_or_else(|| Local.timestamp_opt(0, 0).single().expect("epoch is valid"))
}

/// Whole days between two timestamps, truncating toward zero, matching the
/// original's day-age calculations used by the retention engine's
/// daily/weekly/monthly buckets.
pub fn day_age(reference: i64, then: i64) -> i64 {
    (reference - then) / 86_400
}

/// True if two timestamps fall on the same calendar day in local time,
/// mirroring `mtimesAreSameDay` (used because hardlinked files share an
/// mtime and can't otherwise be told apart by "was this touched today").
pub fn same_day(a: i64, b: i64) -> bool {
    let da = local_datetime(a);
    let db = local_datetime(b);
    da.year() == db.year() && da.month() == db.month() && da.day() == db.day()
}

/// Render a duration in seconds as `HhMmSs`, matching `seconds2hms`.
pub fn seconds_to_hms(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Difference in whole seconds between two timestamps (never negative).
pub fn time_diff(later: i64, earlier: i64) -> i64 {
    (later - earlier).max(0)
}

/// Parse `YYYY-MM-DD` (dashes optional) out of `name`, taking the last match
/// found rather than the first, matching `dateRE.search(filename)` finding
/// the date "near the end of the filename" when a path has several
/// digit-heavy components ahead of it.
pub fn calendar_fields_from_name(name: &str) -> Option<CalendarFields> {
    let re = Regex::new(r"(\d{4})-?(\d{2})-?(\d{2})").expect("static pattern is valid");
    let caps = re.captures_iter(name).last()?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let day: u32 = caps.get(3)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(CalendarFields {
        year,
        month,
        day,
        day_of_week: date.weekday().num_days_from_sunday(),
    })
}

/// Local midnight for a calendar date, matching `updateAges`'s
/// `mktime`-from-broken-down-fields construction of `name_mtime`.
pub fn timestamp_for_date(year: i32, month: u32, day: u32) -> Option<i64> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive_midnight = date.and_hms_opt(0, 0, 0)?;
    match Local.from_local_datetime(&naive_midnight) {
        chrono::LocalResult::Single(dt) => Some(dt.timestamp()),
        chrono::LocalResult::Ambiguous(dt, _) => Some(dt.timestamp()),
        chrono::LocalResult::None => None,
    }
}

/// Whole days between `reference` and a calendar date's local midnight,
/// matching `fnameDayAge` in `updateAges` (derived from the filename date,
/// not from `stat()`'s mtime).
pub fn day_age_from_date(reference: i64, year: i32, month: u32, day: u32) -> i64 {
    match timestamp_for_date(year, month, day) {
        Some(ts) => day_age(reference, ts),
        None => 0,
    }
}

/// Current unix time, local time of day split out for display purposes
/// (hour/minute/second), matching the original's `dw()` helper's sibling
/// clock-formatting use in status output.
pub fn clock_fields(unix_secs: i64) -> (u32, u32, u32) {
    let dt = local_datetime(unix_secs);
    (dt.hour(), dt.minute(), dt.second())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms_formats_thresholds() {
        assert_eq!(seconds_to_hms(5), "5s");
        assert_eq!(seconds_to_hms(65), "1m05s");
        assert_eq!(seconds_to_hms(3661), "1h01m01s");
    }

    #[test]
    fn day_age_truncates() {
        assert_eq!(day_age(86_400 * 3, 0), 3);
        assert_eq!(day_age(86_400 * 3 - 1, 0), 2);
    }

    #[test]
    fn same_day_detects_midnight_crossing() {
        assert!(!same_day(0, 86_400));
    }

    #[test]
    fn calendar_fields_from_name_takes_last_match() {
        let fields = calendar_fields_from_name("2026/07/mydb-20260727.sql.gz").unwrap();
        assert_eq!((fields.year, fields.month, fields.day), (2026, 7, 27));
    }

    #[test]
    fn calendar_fields_from_name_rejects_garbage() {
        assert!(calendar_fields_from_name("no-date-here.txt").is_none());
    }
}
