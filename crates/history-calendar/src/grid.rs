//! Fixed 6×7 month grid.
//!
//! The grid always starts on the Sunday on or before the first of the month
//! and always covers 42 days, whatever the month's length. Its span is the
//! visible window that bounds recurrence expansion.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone};
use serde::Serialize;

use crate::local_date::local_midnight;

pub const WEEKS: usize = 6;
pub const DAYS_PER_WEEK: usize = 7;
pub const GRID_DAYS: usize = WEEKS * DAYS_PER_WEEK;

/// The 42 dates shown for one month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthGrid {
    /// Rows are Sunday-first weeks.
    pub weeks: [[NaiveDate; DAYS_PER_WEEK]; WEEKS],
    /// Calendar month of the anchor, 1-based.
    pub month: u32,
    pub year: i32,
}

/// Instant bounds of a grid: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone)]
pub struct GridWindow<Z: TimeZone> {
    pub start: DateTime<Z>,
    pub end: DateTime<Z>,
}

impl<Z: TimeZone> GridWindow<Z> {
    pub fn contains(&self, instant: &DateTime<Z>) -> bool {
        *instant >= self.start && *instant < self.end
    }
}

/// Build the grid for the month containing `anchor`.
///
/// # Examples
///
/// ```
/// use chrono::{Datelike, NaiveDate, Weekday};
/// use history_calendar::grid::build_month_grid;
///
/// let grid = build_month_grid(NaiveDate::from_ymd_opt(2025, 6, 18).unwrap());
/// assert_eq!(grid.first_day(), NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
/// assert_eq!(grid.first_day().weekday(), Weekday::Sun);
/// assert_eq!(grid.last_day(), NaiveDate::from_ymd_opt(2025, 7, 12).unwrap());
/// ```
pub fn build_month_grid(anchor: NaiveDate) -> MonthGrid {
    let first = anchor.with_day(1).unwrap_or(anchor);
    let lead = first.weekday().num_days_from_sunday() as i64;
    let grid_start = first - Duration::days(lead);

    let mut weeks = [[grid_start; DAYS_PER_WEEK]; WEEKS];
    for (w, week) in weeks.iter_mut().enumerate() {
        for (d, cell) in week.iter_mut().enumerate() {
            *cell = grid_start + Duration::days((w * DAYS_PER_WEEK + d) as i64);
        }
    }

    MonthGrid {
        weeks,
        month: first.month(),
        year: first.year(),
    }
}

impl MonthGrid {
    pub fn first_day(&self) -> NaiveDate {
        self.weeks[0][0]
    }

    pub fn last_day(&self) -> NaiveDate {
        self.weeks[WEEKS - 1][DAYS_PER_WEEK - 1]
    }

    /// All 42 dates in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.weeks.iter().flat_map(|week| week.iter().copied())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first_day() && date <= self.last_day()
    }

    /// Whether `date` belongs to the grid's own month rather than a neighbour.
    pub fn in_month(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Local midnight of the first cell to local midnight after the last cell.
    ///
    /// Returns `None` only if a midnight cannot be represented in `zone`.
    pub fn window<Z: TimeZone>(&self, zone: &Z) -> Option<GridWindow<Z>> {
        let start = local_midnight(self.first_day(), zone)?;
        let end = local_midnight(self.last_day().succ_opt()?, zone)?;
        Some(GridWindow { start, end })
    }
}

/// Move `anchor` by `delta` months, clamping the day to the target month.
pub fn shift_month(anchor: NaiveDate, delta: i32) -> Option<NaiveDate> {
    let months = Months::new(delta.unsigned_abs());
    if delta >= 0 {
        anchor.checked_add_months(months)
    } else {
        anchor.checked_sub_months(months)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
