//! Day, week, month and list views over a materialized event batch.
//!
//! Every function is pure and deterministic. Buckets come back in ascending
//! chronological order, and items inside a bucket are sorted by start instant
//! (stable, so ties keep input order). Events whose start cannot be resolved
//! appear in no view.
//!
//! List views take `now` explicitly. [`upcoming`] cuts at the start of today,
//! so earlier-today events stay listed. [`shared_upcoming`] cuts at `now`
//! itself.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, TimeZone};
use serde::Serialize;

use crate::local_date::{local_midnight, resolve_local_date, start_of_day};
use crate::model::{is_shared, CalendarEvent};

/// Local calendar day used as a bucket key. Displays as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DayKey(pub NaiveDate);

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Events of one Monday-to-Sunday week.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekGroup {
    pub week_start: NaiveDate,
    /// e.g. `"Jun 2 - Jun 8, 2025"`.
    pub range_label: String,
    pub items: Vec<CalendarEvent>,
}

/// Events of one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthGroup {
    pub year: i32,
    /// 1-based.
    pub month: u32,
    /// e.g. `"June 2025"`.
    pub label: String,
    pub items: Vec<CalendarEvent>,
}

/// Bucket events by the local calendar day of their start.
pub fn group_by_day<Z: TimeZone>(
    events: &[CalendarEvent],
    zone: &Z,
) -> BTreeMap<DayKey, Vec<CalendarEvent>> {
    let mut days: BTreeMap<DayKey, Vec<CalendarEvent>> = BTreeMap::new();
    for (start, event) in chronological(events, zone) {
        days.entry(DayKey(start.date_naive()))
            .or_default()
            .push(event.clone());
    }
    days
}

/// Events starting today (in `now`'s zone) or later.
pub fn upcoming<Z: TimeZone>(events: &[CalendarEvent], now: &DateTime<Z>) -> Vec<CalendarEvent> {
    let from = start_of_day(now);
    chronological(events, &now.timezone())
        .into_iter()
        .filter(|(start, _)| *start >= from)
        .map(|(_, event)| event.clone())
        .collect()
}

/// [`upcoming`] restricted to `[start of today, start of today + days)`.
pub fn upcoming_within_days<Z: TimeZone>(
    events: &[CalendarEvent],
    now: &DateTime<Z>,
    days: u32,
) -> Vec<CalendarEvent> {
    let zone = now.timezone();
    let from = start_of_day(now);
    let until = from
        .date_naive()
        .checked_add_days(Days::new(days.into()))
        .and_then(|date| local_midnight(date, &zone))
        .or_else(|| from.clone().checked_add_signed(Duration::days(days.into())));

    // No representable upper bound keeps everything from today on
    chronological(events, &zone)
        .into_iter()
        .filter(|(start, _)| *start >= from && until.as_ref().is_none_or(|until| start < until))
        .map(|(_, event)| event.clone())
        .collect()
}

/// Shared events starting strictly after `now`.
///
/// Unlike [`upcoming`], the cutoff is the exact instant, so an event earlier
/// today is excluded.
pub fn shared_upcoming<Z: TimeZone>(
    events: &[CalendarEvent],
    now: &DateTime<Z>,
) -> Vec<CalendarEvent> {
    chronological(events, &now.timezone())
        .into_iter()
        .filter(|(start, event)| start > now && is_shared(event))
        .map(|(_, event)| event.clone())
        .collect()
}

/// Group events into ISO weeks (Monday start), ascending by week.
pub fn group_by_iso_week<Z: TimeZone>(events: &[CalendarEvent], zone: &Z) -> Vec<WeekGroup> {
    let mut weeks: BTreeMap<NaiveDate, Vec<CalendarEvent>> = BTreeMap::new();
    for (start, event) in chronological(events, zone) {
        weeks
            .entry(iso_week_start(start.date_naive()))
            .or_default()
            .push(event.clone());
    }

    weeks
        .into_iter()
        .map(|(week_start, items)| WeekGroup {
            range_label: week_label(week_start),
            week_start,
            items,
        })
        .collect()
}

/// Group events by calendar month, ascending.
pub fn group_by_calendar_month<Z: TimeZone>(
    events: &[CalendarEvent],
    zone: &Z,
) -> Vec<MonthGroup> {
    let mut months: BTreeMap<(i32, u32), Vec<CalendarEvent>> = BTreeMap::new();
    for (start, event) in chronological(events, zone) {
        months
            .entry((start.year(), start.month()))
            .or_default()
            .push(event.clone());
    }

    months
        .into_iter()
        .map(|((year, month), items)| MonthGroup {
            label: month_label(year, month),
            year,
            month,
            items,
        })
        .collect()
}

/// Monday on or before `date`.
pub fn iso_week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn week_label(monday: NaiveDate) -> String {
    let sunday = monday + Duration::days(6);
    if monday.year() == sunday.year() {
        format!(
            "{} - {}, {}",
            monday.format("%b %-d"),
            sunday.format("%b %-d"),
            sunday.year()
        )
    } else {
        format!(
            "{} - {}",
            monday.format("%b %-d, %Y"),
            sunday.format("%b %-d, %Y")
        )
    }
}

fn month_label(year: i32, month: u32) -> String {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|first| first.format("%B %Y").to_string())
        .unwrap_or_else(|| format!("{year}-{month:02}"))
}

/// Resolvable events paired with their start, sorted by start (stable).
fn chronological<'a, Z: TimeZone>(
    events: &'a [CalendarEvent],
    zone: &Z,
) -> Vec<(DateTime<Z>, &'a CalendarEvent)> {
    let mut resolved: Vec<(DateTime<Z>, &CalendarEvent)> = events
        .iter()
        .filter_map(|event| Some((resolve_local_date(&event.start, zone)?, event)))
        .collect();
    resolved.sort_by(|a, b| a.0.cmp(&b.0));
    resolved
}

// ── Tests ───────────────────────────────────────────────────────────────────
