//! Flexible time-string input parsing
//!
//! Every filter in the query layer accepts the same input forms:
//! unix seconds, shorthand durations ("7d"), humanized relative
//! ("3 days ago"), and ISO-8601 dates/datetimes. Internally every
//! timestamp is a UTC ISO-8601 string with a trailing Z.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Lower bound for plausible unix-seconds input (2000-01-01T00:00:00Z).
/// Smaller integers are more likely day counts typed by mistake.
const UNIX_SECONDS_FLOOR: i64 = 946_684_800;

static SHORTHAND_RE: OnceLock<Regex> = OnceLock::new();
static HUMANIZED_RE: OnceLock<Regex> = OnceLock::new();

fn shorthand_re() -> &'static Regex {
    SHORTHAND_RE.get_or_init(|| Regex::new(r"^(\d+)(s|m|h|d|w|mo|y)$").unwrap())
}

fn humanized_re() -> &'static Regex {
    HUMANIZED_RE.get_or_init(|| {
        Regex::new(r"^(\d+)\s*(second|minute|hour|day|week|month|year)s?\s+ago$").unwrap()
    })
}

/// Render a timestamp in the canonical stored form.
pub fn to_utc_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Current wall clock in the canonical stored form.
pub fn now_utc_string() -> String {
    to_utc_string(Utc::now())
}

/// Parse one of the accepted time input forms relative to `now`.
pub fn parse_time_input(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    // Unix seconds
    if let Ok(secs) = input.parse::<i64>() {
        if secs >= UNIX_SECONDS_FLOOR {
            return Utc.timestamp_opt(secs, 0).single();
        }
        return None;
    }

    // Shorthand duration: 90s, 15m, 2h, 7d, 3w, 1mo, 1y
    if let Some(caps) = shorthand_re().captures(input) {
        let n: i64 = caps[1].parse().ok()?;
        return Some(now - shorthand_duration(n, &caps[2])?);
    }

    // Humanized relative: "3 days ago"
    let lowered = input.to_ascii_lowercase();
    if let Some(caps) = humanized_re().captures(&lowered) {
        let n: i64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "second" => "s",
            "minute" => "m",
            "hour" => "h",
            "day" => "d",
            "week" => "w",
            "month" => "mo",
            "year" => "y",
            _ => return None,
        };
        return Some(now - shorthand_duration(n, unit)?);
    }

    // ISO-8601 with timezone
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    // ISO-8601 datetime without timezone: assume UTC
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // Bare date: midnight UTC
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }

    None
}

/// Same as `parse_time_input` but renders to the canonical stored form.
pub fn parse_to_utc_string(input: &str, now: DateTime<Utc>) -> Option<String> {
    parse_time_input(input, now).map(to_utc_string)
}

fn shorthand_duration(n: i64, unit: &str) -> Option<Duration> {
    match unit {
        "s" => Some(Duration::seconds(n)),
        "m" => Some(Duration::minutes(n)),
        "h" => Some(Duration::hours(n)),
        "d" => Some(Duration::days(n)),
        "w" => Some(Duration::weeks(n)),
        "mo" => Some(Duration::days(n * 30)),
        "y" => Some(Duration::days(n * 365)),
        _ => None,
    }
}
