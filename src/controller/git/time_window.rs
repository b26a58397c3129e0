//! # Time Windows
//!
//! Decides whether a subscription's deployment window excludes a point in time.
//!
//! An `active` window (the default) allows ticks only inside the window, a
//! `blocked` window forbids them inside it. Days are full or three-letter
//! English names; hours accept `10:20AM`, `10:20 AM` or `22:15`. Ranges whose
//! end precedes their start wrap past midnight.

use crate::crd::{HourRange, TimeWindow};
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Offset, Utc, Weekday};
use tracing::warn;

/// True when `window` excludes `now`
#[must_use]
pub fn is_excluded(window: &TimeWindow, now: DateTime<Utc>) -> bool {
    if window.days_of_week.is_empty() && window.hours.is_empty() {
        return false;
    }

    let local = now.with_timezone(&window_offset(window.location.as_deref()));
    let inside = day_matches(&window.days_of_week, local.weekday())
        && hours_match(&window.hours, local.time());

    let blocked_type = window
        .window_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("blocked"));
    if blocked_type {
        inside
    } else {
        !inside
    }
}

fn window_offset(location: Option<&str>) -> FixedOffset {
    let utc = Utc.fix();
    match location.map(str::trim) {
        None | Some("" | "UTC" | "Etc/UTC" | "GMT") => utc,
        Some(location) => location.parse::<FixedOffset>().unwrap_or_else(|_err| {
            warn!("Unsupported time window location '{location}', evaluating in UTC");
            utc
        }),
    }
}

fn day_matches(days: &[String], today: Weekday) -> bool {
    if days.is_empty() {
        return true;
    }
    days.iter().any(|day| match parse_weekday(day) {
        Some(weekday) => weekday == today,
        None => {
            warn!("Ignoring unknown time window day '{day}'");
            false
        }
    })
}

fn parse_weekday(day: &str) -> Option<Weekday> {
    let day = day.trim().to_ascii_lowercase();
    let prefix = day.get(..3)?;
    match prefix {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn hours_match(hours: &[HourRange], time: NaiveTime) -> bool {
    if hours.is_empty() {
        return true;
    }
    hours.iter().any(|range| {
        let (Some(start), Some(end)) = (parse_clock(&range.start), parse_clock(&range.end)) else {
            warn!(
                "Ignoring invalid time window range {}-{}",
                range.start, range.end
            );
            return false;
        };
        if start <= end {
            start <= time && time < end
        } else {
            time >= start || time < end
        }
    })
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    let value = value.trim().to_ascii_uppercase();
    ["%I:%M%p", "%I:%M %p", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(&value, format).ok())
}
