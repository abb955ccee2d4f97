//! Drift-free resolution of stored date strings into local instants.
//!
//! Stored events mix date-only values (`"2025-03-01"`) with full timestamps.
//! Parsing a date-only value as UTC midnight shifts it to the previous day for
//! every zone west of UTC, so date-only values are built from their calendar
//! fields at local midnight instead. Everything else goes through a general
//! timestamp parser.
//!
//! "Local" is always an explicit zone argument: `chrono::Local` in production,
//! any `chrono_tz::Tz` in tests. Nothing here reads the system clock.

use chrono::{
    DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone,
};

/// Offset-less formats read as local wall-clock time, tried in order.
const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Resolve a stored date string to an instant in `zone`.
///
/// A strict `YYYY-MM-DD` value becomes local midnight of that calendar day.
/// Anything else is tried as RFC 3339, then as an offset-less local datetime,
/// then as RFC 2822.
///
/// Returns `None` for unparseable input. Callers treat `None` as "exclude
/// this event".
///
/// # Examples
///
/// ```
/// use chrono::{Datelike, FixedOffset};
/// use history_calendar::local_date::resolve_local_date;
///
/// let west = FixedOffset::west_opt(12 * 3600).unwrap();
/// let dt = resolve_local_date("2025-03-01", &west).unwrap();
/// assert_eq!((dt.year(), dt.month(), dt.day()), (2025, 3, 1));
/// ```
pub fn resolve_local_date<Z: TimeZone>(input: &str, zone: &Z) -> Option<DateTime<Z>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if is_date_only(input) {
        return parse_date_only(input).and_then(|date| local_midnight(date, zone));
    }
    parse_timestamp(input, zone)
}

/// Whether `input` has the strict `YYYY-MM-DD` shape (no validation of ranges).
pub fn is_date_only(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Parse a strict `YYYY-MM-DD` value into its calendar date.
///
/// Out-of-range fields (`2025-02-30`) yield `None` rather than rolling over.
pub fn parse_date_only(input: &str) -> Option<NaiveDate> {
    if !is_date_only(input) {
        return None;
    }
    let year = input[0..4].parse::<i32>().ok()?;
    let month = input[5..7].parse::<u32>().ok()?;
    let day = input[8..10].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Local midnight of `date` in `zone`.
///
/// Where midnight does not exist (a DST gap at 00:00) the first valid instant
/// after it is used, so the result always falls on `date`.
pub fn local_midnight<Z: TimeZone>(date: NaiveDate, zone: &Z) -> Option<DateTime<Z>> {
    to_local(date.and_time(NaiveTime::MIN), zone)
}

/// Map a wall-clock time to an instant. Ambiguous times take the earlier
/// instant; nonexistent times are pushed forward by an hour.
pub fn to_local<Z: TimeZone>(naive: NaiveDateTime, zone: &Z) -> Option<DateTime<Z>> {
    zone.from_local_datetime(&naive).earliest().or_else(|| {
        let shifted = naive.checked_add_signed(Duration::hours(1))?;
        zone.from_local_datetime(&shifted).earliest()
    })
}

/// Start of the local day containing `instant`.
pub fn start_of_day<Z: TimeZone>(instant: &DateTime<Z>) -> DateTime<Z> {
    local_midnight(instant.date_naive(), &instant.timezone()).unwrap_or_else(|| instant.clone())
}

/// Format an instant as RFC 3339 with its local offset, to the second.
pub fn format_timestamp<Z: TimeZone>(instant: &DateTime<Z>) -> String {
    instant
        .fixed_offset()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp<Z: TimeZone>(input: &str, zone: &Z) -> Option<DateTime<Z>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(zone));
    }
    for format in LOCAL_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return to_local(naive, zone);
        }
    }
    DateTime::parse_from_rfc2822(input)
        .ok()
        .map(|dt| dt.with_timezone(zone))
}

// ── Tests ───────────────────────────────────────────────────────────────────
