//! Structured digit validation for reschedule datetimes
//!
//! Day 01–31, month 01–12, hour 00–23, minute 00–59, with the day/month
//! combination validated against the calendar and the result required to
//! be in the future in the provider's zone. The year is inferred: the next
//! occurrence of that day and month.

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, TimeZone};
use chrono_tz::Tz;

pub fn parse_two_digits(digits: &str) -> Option<u32> {
    if digits.len() != 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn valid_day(day: u32) -> bool {
    (1..=31).contains(&day)
}

pub fn valid_month(month: u32) -> bool {
    (1..=12).contains(&month)
}

/// Parse "HHMM" into (hour, minute).
pub fn parse_time(digits: &str) -> Option<(u32, u32)> {
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = digits[..2].parse().ok()?;
    let minute: u32 = digits[2..].parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// Resolve day/month/time to the next future instant in `tz`.
///
/// Returns `None` when the combination never forms a real calendar date
/// (e.g. 31/02) or when it cannot land in the future within two years
/// (31/02 is the only such case in practice).
pub fn resolve_future_datetime(
    day: u32,
    month: u32,
    hour: u32,
    minute: u32,
    now: DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    if !valid_day(day) || !valid_month(month) || hour > 23 || minute > 59 {
        return None;
    }
    let tz = now.timezone();
    // Try this year, then next (covers a 29/02 keyed just after February).
    for year in [now.year(), now.year() + 1, now.year() + 2] {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
            continue;
        };
        let resolved = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            // DST gap or fold: take the later instant.
            LocalResult::Ambiguous(_, later) => later,
            LocalResult::None => continue,
        };
        if resolved > now {
            return Some(resolved);
        }
    }
    None
}
