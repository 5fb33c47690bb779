//! The `YYYYMMDD-HHMMSS` filename timestamp.
//!
//! Every backup file carries its creation time in its name; ages are always
//! derived from that segment, never from filesystem metadata, so they stay
//! stable across copies and restores.

use chrono::{Local, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;

pub const DATE_FORMAT: &str = "%Y%m%d-%H%M%S";

static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8}-\d{6}$").unwrap());

/// Whether a string has the exact `YYYYMMDD-HHMMSS` shape.
///
/// Shape only; use [`parse_date_string`] to also reject impossible dates.
pub fn looks_like_date_string(s: &str) -> bool {
    DATE_RE.is_match(s)
}

/// Format a unix timestamp as a filename date segment, in local time.
pub fn format_timestamp(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.format(DATE_FORMAT).to_string()
        }
        chrono::LocalResult::None => Local::now().format(DATE_FORMAT).to_string(),
    }
}

/// The current local time as a filename date segment.
pub fn now_date_string() -> String {
    Local::now().format(DATE_FORMAT).to_string()
}

/// Parse a filename date segment back to unix seconds, interpreting it as
/// local time. Returns `None` when the shape or the calendar rejects it.
pub fn parse_date_string(date_string: &str) -> Option<i64> {
    if !looks_like_date_string(date_string) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(date_string, DATE_FORMAT).ok()?;
    // DST gaps can make a local time ambiguous or nonexistent; earliest is
    // good enough for age arithmetic.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Current unix time in seconds.
pub fn now_ts() -> i64 {
    Local::now().timestamp()
}
