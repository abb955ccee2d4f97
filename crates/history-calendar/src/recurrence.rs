//! Weekly recurrence expansion bounded by the visible month grid.
//!
//! Only `FREQ=WEEKLY` rules with a `BYDAY=` list are expanded. Expansion never
//! runs past the 42-day grid window, so cost stays proportional to
//! events × weekdays × six weeks however long ago a series began.
//!
//! Every input event is emitted once as its base occurrence. Generated
//! occurrences copy the base event and rewrite only `id`, `start` and `end`.
//! All events pass through one dedup-aware appender keyed on
//! `(history_id, title, start, end)`.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Weekday};
use tracing::debug;

use crate::error::RecurrenceError;
use crate::grid::{build_month_grid, GridWindow};
use crate::local_date::{format_timestamp, is_date_only, resolve_local_date, to_local};
use crate::model::CalendarEvent;

/// Assumed length of an event that has no usable end.
pub const DEFAULT_DURATION_MINUTES: i64 = 90;

/// A parsed `FREQ=WEEKLY;BYDAY=...` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyRule {
    days: Vec<Weekday>,
}

impl WeeklyRule {
    /// Parse a recurrence string.
    ///
    /// Returns `Ok(None)` when the string is not a weekly BYDAY rule at all
    /// (the event simply does not repeat). Matching is case-insensitive.
    /// Unknown day codes are ignored as long as one valid code remains, and
    /// repeated codes collapse.
    ///
    /// # Errors
    ///
    /// [`RecurrenceError::EmptyByDay`] for `BYDAY=` with no value, and
    /// [`RecurrenceError::NoKnownWeekday`] when no code is recognised.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Weekday;
    /// use history_calendar::recurrence::WeeklyRule;
    ///
    /// let rule = WeeklyRule::parse("FREQ=WEEKLY;BYDAY=MO,WE").unwrap().unwrap();
    /// assert_eq!(rule.weekdays(), &[Weekday::Mon, Weekday::Wed]);
    /// assert!(WeeklyRule::parse("FREQ=DAILY").unwrap().is_none());
    /// ```
    pub fn parse(rule: &str) -> Result<Option<Self>, RecurrenceError> {
        let upper = rule.to_ascii_uppercase();
        if !upper.contains("FREQ=WEEKLY") {
            return Ok(None);
        }
        let Some(pos) = upper.find("BYDAY=") else {
            return Ok(None);
        };

        let value = upper[pos + "BYDAY=".len()..]
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        if value.is_empty() {
            return Err(RecurrenceError::EmptyByDay);
        }

        let mut days = Vec::new();
        for code in value.split(',') {
            match weekday_from_code(code.trim()) {
                Some(day) if !days.contains(&day) => days.push(day),
                Some(_) => {}
                None => debug!(code = code.trim(), "ignoring unknown BYDAY code"),
            }
        }
        if days.is_empty() {
            return Err(RecurrenceError::NoKnownWeekday(value.to_string()));
        }
        Ok(Some(Self { days }))
    }

    pub fn weekdays(&self) -> &[Weekday] {
        &self.days
    }
}

fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code {
        "SU" => Some(Weekday::Sun),
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        _ => None,
    }
}

// ── Dedup ───────────────────────────────────────────────────────────────────

/// Identity used to suppress duplicate events within one batch.
///
/// `start` and `end` are canonicalized: values that resolve to an instant are
/// keyed by that instant, so `"2025-06-02"` and an occurrence generated for the
/// same local midnight collide. Unresolvable values are keyed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub history_id: String,
    pub title: String,
    pub start: String,
    pub end: String,
}

pub fn dedup_key<Z: TimeZone>(event: &CalendarEvent, zone: &Z) -> DedupKey {
    DedupKey {
        history_id: event.history_id.clone(),
        title: event.title.clone(),
        start: canonical_instant(&event.start, zone),
        end: event
            .end
            .as_deref()
            .map(|end| canonical_instant(end, zone))
            .unwrap_or_default(),
    }
}

fn canonical_instant<Z: TimeZone>(value: &str, zone: &Z) -> String {
    match resolve_local_date(value, zone) {
        Some(instant) => format!("@{}", instant.timestamp_millis()),
        None => value.to_string(),
    }
}

struct Appender<'z, Z: TimeZone> {
    zone: &'z Z,
    seen: HashSet<DedupKey>,
    events: Vec<CalendarEvent>,
}

impl<'z, Z: TimeZone> Appender<'z, Z> {
    fn new(zone: &'z Z, capacity: usize) -> Self {
        Self {
            zone,
            seen: HashSet::with_capacity(capacity),
            events: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, event: CalendarEvent) {
        if self.seen.insert(dedup_key(&event, self.zone)) {
            self.events.push(event);
        } else {
            debug!(id = %event.id, "skipping duplicate event");
        }
    }
}

// ── Expansion ───────────────────────────────────────────────────────────────

/// Expansion output plus the events whose recurrence was abandoned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpansionReport {
    pub events: Vec<CalendarEvent>,
    pub abandoned: Vec<(String, RecurrenceError)>,
}

/// Expand weekly-recurring events across the grid of `anchor`'s month.
pub fn expand_recurring<Z: TimeZone>(
    events: &[CalendarEvent],
    anchor: NaiveDate,
    zone: &Z,
) -> Vec<CalendarEvent> {
    expand_recurring_with_report(events, anchor, zone).events
}

/// Like [`expand_recurring`], but reports why any expansion was abandoned.
pub fn expand_recurring_with_report<Z: TimeZone>(
    events: &[CalendarEvent],
    anchor: NaiveDate,
    zone: &Z,
) -> ExpansionReport {
    let window = build_month_grid(anchor).window(zone);
    expand_in_window(events, window.as_ref(), zone)
}

fn expand_in_window<Z: TimeZone>(
    events: &[CalendarEvent],
    window: Option<&GridWindow<Z>>,
    zone: &Z,
) -> ExpansionReport {
    let mut appender = Appender::new(zone, events.len());
    let mut abandoned = Vec::new();

    for event in events {
        appender.push(event.clone());

        let result = match window {
            Some(window) => occurrences(event, window, zone),
            None => unbounded(event),
        };
        match result {
            Ok(generated) => {
                for occurrence in generated {
                    appender.push(occurrence);
                }
            }
            Err(reason) => {
                debug!(id = %event.id, %reason, "abandoned recurrence expansion");
                abandoned.push((event.id.clone(), reason));
            }
        }
    }

    ExpansionReport {
        events: appender.events,
        abandoned,
    }
}

/// A weekly series cannot expand when the grid has no local bounds.
fn unbounded(event: &CalendarEvent) -> Result<Vec<CalendarEvent>, RecurrenceError> {
    match event.recurrence.as_deref() {
        Some(rule) if WeeklyRule::parse(rule)?.is_some() => {
            Err(RecurrenceError::UnrepresentableDate)
        }
        _ => Ok(Vec::new()),
    }
}

/// Occurrences of one event inside `window`. Non-recurring events yield none.
fn occurrences<Z: TimeZone>(
    event: &CalendarEvent,
    window: &GridWindow<Z>,
    zone: &Z,
) -> Result<Vec<CalendarEvent>, RecurrenceError> {
    let Some(rule) = event.recurrence.as_deref() else {
        return Ok(Vec::new());
    };
    let Some(rule) = WeeklyRule::parse(rule)? else {
        return Ok(Vec::new());
    };

    let start = resolve_local_date(&event.start, zone)
        .ok_or_else(|| RecurrenceError::UnparseableStart(event.start.clone()))?;
    let duration = event
        .end
        .as_deref()
        .and_then(|end| resolve_local_date(end, zone))
        .map(|end| end.signed_duration_since(start.clone()))
        .filter(|d| *d > Duration::zero())
        .unwrap_or_else(|| Duration::minutes(DEFAULT_DURATION_MINUTES));
    let date_only = is_date_only(event.start.trim());
    let time_of_day = start.time();

    let search_from = if start > window.start {
        start.date_naive()
    } else {
        window.start.date_naive()
    };

    let mut generated = Vec::new();
    for &weekday in rule.weekdays() {
        let ahead = (weekday.num_days_from_sunday() + 7
            - search_from.weekday().num_days_from_sunday())
            % 7;
        let mut date = add_days(search_from, ahead as u64)?;
        let mut instant = at_time(date, time_of_day, zone)?;
        if instant < start {
            date = add_days(date, 7)?;
            instant = at_time(date, time_of_day, zone)?;
        }

        while instant < window.end {
            generated.push(occurrence(event, &instant, duration, date_only));
            date = add_days(date, 7)?;
            instant = at_time(date, time_of_day, zone)?;
        }
    }
    Ok(generated)
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate, RecurrenceError> {
    date.checked_add_days(Days::new(days))
        .ok_or(RecurrenceError::UnrepresentableDate)
}

fn at_time<Z: TimeZone>(
    date: NaiveDate,
    time: NaiveTime,
    zone: &Z,
) -> Result<DateTime<Z>, RecurrenceError> {
    to_local(date.and_time(time), zone).ok_or(RecurrenceError::UnrepresentableDate)
}

fn occurrence<Z: TimeZone>(
    base: &CalendarEvent,
    start: &DateTime<Z>,
    duration: Duration,
    date_only: bool,
) -> CalendarEvent {
    let end = start.clone() + duration;
    let (start_text, end_text) = if date_only {
        (
            start.date_naive().format("%Y-%m-%d").to_string(),
            end.date_naive().format("%Y-%m-%d").to_string(),
        )
    } else {
        (format_timestamp(start), format_timestamp(&end))
    };

    CalendarEvent {
        id: format!("{}-r{}", base.id, start.timestamp_millis()),
        start: start_text,
        // A base without an end keeps none, so the base instance dedups
        // against its own occurrence.
        end: base.end.as_ref().map(|_| end_text),
        ..base.clone()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};
    use chrono_tz::Tz;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(id: &str, start: &str, recurrence: Option<&str>) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            history_id: id.split('-').next().unwrap_or(id).to_string(),
            title: "Practice".to_string(),
            start: start.to_string(),
            recurrence: recurrence.map(str::to_string),
            ..Default::default()
        }
    }

    fn starts_in<Z: TimeZone>(events: &[CalendarEvent], zone: &Z) -> Vec<DateTime<Z>> {
        events
            .iter()
            .map(|e| resolve_local_date(&e.start, zone).unwrap())
            .collect()
    }

    // ── rule parsing ────────────────────────────────────────────────────

    #[test]
    fn test_parse_is_case_insensitive() {
        let rule = WeeklyRule::parse("rrule:freq=weekly;byday=fr;interval=1")
            .unwrap()
            .unwrap();
        assert_eq!(rule.weekdays(), &[Weekday::Fri]);
    }

    #[test]
    fn test_parse_non_weekly_is_not_a_candidate() {
        assert_eq!(WeeklyRule::parse("FREQ=DAILY;BYDAY=MO"), Ok(None));
        assert_eq!(WeeklyRule::parse("FREQ=WEEKLY"), Ok(None));
        assert_eq!(WeeklyRule::parse(""), Ok(None));
    }

    #[test]
    fn test_parse_malformed_byday() {
        assert_eq!(
            WeeklyRule::parse("FREQ=WEEKLY;BYDAY="),
            Err(RecurrenceError::EmptyByDay)
        );
        assert_eq!(
            WeeklyRule::parse("FREQ=WEEKLY;BYDAY=XX,YY"),
            Err(RecurrenceError::NoKnownWeekday("XX,YY".into()))
        );
    }

    #[test]
    fn test_parse_ignores_unknown_and_repeated_codes() {
        let rule = WeeklyRule::parse("FREQ=WEEKLY;BYDAY=MO, XX ,MO,SU")
            .unwrap()
            .unwrap();
        assert_eq!(rule.weekdays(), &[Weekday::Mon, Weekday::Sun]);
    }

    // ── expansion ───────────────────────────────────────────────────────

    #[test]
    fn test_weekly_monday_from_date_only_start() {
        let base = event("h1-0", "2025-06-02", Some("FREQ=WEEKLY;BYDAY=MO"));
        let out = expand_recurring(&[base], date(2025, 6, 15), &Utc);

        let days: Vec<NaiveDate> = starts_in(&out, &Utc).iter().map(|d| d.date_naive()).collect();
        assert_eq!(
            days,
            [
                date(2025, 6, 2),
                date(2025, 6, 9),
                date(2025, 6, 16),
                date(2025, 6, 23),
                date(2025, 6, 30),
                date(2025, 7, 7)
            ]
        );
        assert_eq!(out[0].id, "h1-0");
        for occ in &out {
            assert!(crate::local_date::is_date_only(&occ.start), "got {}", occ.start);
            assert_eq!(occ.title, "Practice");
            assert_eq!(occ.history_id, "h1");
        }
    }

    #[test]
    fn test_expansion_bounded_to_grid_window() {
        let tz: Tz = "America/Denver".parse().unwrap();
        let base = event("h2-0", "2025-01-06T18:30:00", Some("FREQ=WEEKLY;BYDAY=MO,WE"));
        let out = expand_recurring(&[base], date(2025, 6, 1), &tz);
        let window = build_month_grid(date(2025, 6, 1)).window(&tz).unwrap();

        // Base occurrence in January plus six Mondays and six Wednesdays
        assert_eq!(out.len(), 13);
        for instant in starts_in(&out[1..], &tz) {
            assert!(window.contains(&instant), "{instant} outside window");
            assert!(matches!(instant.weekday(), Weekday::Mon | Weekday::Wed));
            assert_eq!((instant.hour(), instant.minute()), (18, 30));
        }
    }

    #[test]
    fn test_never_emits_before_declared_start() {
        // Thursday start, Monday/Thursday rule
        let base = event("h3-0", "2025-06-19T10:00:00Z", Some("FREQ=WEEKLY;BYDAY=MO,TH"));
        let out = expand_recurring(&[base.clone()], date(2025, 6, 1), &Utc);
        let start = resolve_local_date(&base.start, &Utc).unwrap();
        let starts = starts_in(&out, &Utc);
        assert!(starts.iter().all(|s| *s >= start));
        assert_eq!(
            starts.iter().filter(|s| s.weekday() == Weekday::Mon).count(),
            3 // Jun 23, Jun 30, Jul 7
        );
        assert_eq!(
            starts.iter().filter(|s| s.weekday() == Weekday::Thu).count(),
            4 // Jun 19 (base), Jun 26, Jul 3, Jul 10
        );
    }

    #[test]
    fn test_series_starting_on_first_cell_not_doubled() {
        // Series begins on the grid's first cell; the first instance is the
        // base itself and must not appear twice
        let base = event("h4-0", "2025-06-01T20:00:00Z", Some("FREQ=WEEKLY;BYDAY=SU"));
        let out = expand_recurring(&[base], date(2025, 6, 1), &Utc);
        let first = resolve_local_date(&out[0].start, &Utc).unwrap();
        assert_eq!(first.date_naive(), date(2025, 6, 1));
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_series_starting_after_window_emits_base_only() {
        let base = event("h5-0", "2025-09-01", Some("FREQ=WEEKLY;BYDAY=MO"));
        let out = expand_recurring(&[base], date(2025, 6, 1), &Utc);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_wall_clock_time_kept_across_dst() {
        // US DST begins 2025-03-09; grid for March runs Feb 23 to Apr 5
        let tz: Tz = "America/New_York".parse().unwrap();
        let base = event("h6-0", "2025-02-02T09:00:00", Some("FREQ=WEEKLY;BYDAY=SU"));
        let out = expand_recurring(&[base], date(2025, 3, 1), &tz);
        let generated = starts_in(&out[1..], &tz);
        assert_eq!(generated.len(), 6);
        assert!(generated.iter().all(|s| s.hour() == 9));
    }

    #[test]
    fn test_occurrence_keeps_duration() {
        let mut base = event("h7-0", "2025-06-02T18:00:00Z", Some("FREQ=WEEKLY;BYDAY=MO"));
        base.end = Some("2025-06-02T20:15:00Z".into());
        base.location = Some("Gym".into());
        let out = expand_recurring(&[base], date(2025, 6, 1), &Utc);

        let second = &out[1];
        assert_eq!(second.start, "2025-06-09T18:00:00Z");
        assert_eq!(second.end.as_deref(), Some("2025-06-09T20:15:00Z"));
        assert_eq!(second.location.as_deref(), Some("Gym"));
        assert!(second.id.starts_with("h7-0-r"));
    }

    #[test]
    fn test_non_positive_duration_uses_default() {
        let mut base = event("h8-0", "2025-06-02T18:00:00Z", Some("FREQ=WEEKLY;BYDAY=TU"));
        base.end = Some("2025-06-02T17:00:00Z".into());
        let out = expand_recurring(&[base], date(2025, 6, 1), &Utc);
        assert_eq!(out[1].start, "2025-06-03T18:00:00Z");
        assert_eq!(out[1].end.as_deref(), Some("2025-06-03T19:30:00Z"));
    }

    #[test]
    fn test_occurrence_ids_are_unique() {
        let base = event("h9-0", "2025-05-01T07:00:00Z", Some("FREQ=WEEKLY;BYDAY=SU,MO,TU,WE,TH,FR,SA"));
        let out = expand_recurring(&[base], date(2025, 6, 1), &Utc);
        let ids: HashSet<&str> = out.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), out.len());
        assert_eq!(out.len(), 43);
    }

    // ── dedup ───────────────────────────────────────────────────────────

    #[test]
    fn test_generated_occurrence_dedups_against_existing_event() {
        let series = event("h1-0", "2025-06-02T10:00:00Z", Some("FREQ=WEEKLY;BYDAY=MO"));
        let single = event("h1-1", "2025-06-09T10:00:00Z", None);
        let out = expand_recurring(&[series, single], date(2025, 6, 1), &Utc);

        let on_june_9 = out
            .iter()
            .filter(|e| e.start == "2025-06-09T10:00:00Z")
            .count();
        assert_eq!(on_june_9, 1);
        assert!(out.iter().all(|e| e.id != "h1-1"));
    }

    #[test]
    fn test_identical_base_events_collapse() {
        let a = event("h1-0", "2025-06-05", None);
        let mut b = a.clone();
        b.id = "h1-1".into();
        let out = expand_recurring(&[a, b], date(2025, 6, 1), &Utc);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_different_history_ids_do_not_collapse() {
        let a = event("h1-0", "2025-06-05", None);
        let b = event("h2-0", "2025-06-05", None);
        let out = expand_recurring(&[a, b], date(2025, 6, 1), &Utc);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_dedup_key_canonicalizes_instants() {
        let a = event("h1-0", "2025-06-05T10:00:00Z", None);
        let b = event("h1-1", "2025-06-05T12:00:00+02:00", None);
        assert_eq!(dedup_key(&a, &Utc), dedup_key(&b, &Utc));
    }

    // ── failures ────────────────────────────────────────────────────────

    #[test]
    fn test_malformed_rule_keeps_base() {
        let base = event("h1-0", "2025-06-02", Some("FREQ=WEEKLY;BYDAY="));
        let report = expand_recurring_with_report(&[base], date(2025, 6, 1), &Utc);
        assert_eq!(report.events.len(), 1);
        assert_eq!(
            report.abandoned,
            vec![("h1-0".to_string(), RecurrenceError::EmptyByDay)]
        );
    }

    #[test]
    fn test_unparseable_start_keeps_base() {
        let base = event("h1-0", "whenever", Some("FREQ=WEEKLY;BYDAY=MO"));
        let report = expand_recurring_with_report(&[base], date(2025, 6, 1), &Utc);
        assert_eq!(report.events.len(), 1);
        assert!(matches!(
            report.abandoned[0].1,
            RecurrenceError::UnparseableStart(_)
        ));
    }

    #[test]
    fn test_missing_window_reports_weekly_series() {
        let events = [
            event("h1-0", "2025-06-02", Some("FREQ=WEEKLY;BYDAY=MO")),
            event("h2-0", "2025-06-03", Some("FREQ=DAILY")),
            event("h3-0", "2025-06-04", None),
        ];
        let report = expand_in_window::<Utc>(&events, None, &Utc);
        assert_eq!(report.events.len(), 3);
        assert_eq!(
            report.abandoned,
            vec![("h1-0".to_string(), RecurrenceError::UnrepresentableDate)]
        );
    }
}
