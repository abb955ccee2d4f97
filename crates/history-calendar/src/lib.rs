//! # history-calendar
//!
//! Turns imported history records into calendar events and calendar views.
//!
//! The pipeline is a single synchronous pass, re-run on every load, month
//! change or create/delete signal:
//!
//! ```text
//! HistoryItem[] ── normalize ──▶ CalendarEvent[] ── expand_recurring ──▶ CalendarEvent[] ── views
//!                                                   (bounded by the month grid)
//! ```
//!
//! ## Modules
//!
//! - [`local_date`]: date-only vs timestamp resolution without day drift
//! - [`normalize`]: stored payload shapes → canonical [`CalendarEvent`]s
//! - [`grid`]: fixed 6×7 month grid and its instant window
//! - [`recurrence`]: weekly BYDAY expansion with dedup
//! - [`views`]: day, ISO-week, month, upcoming and shared views
//! - [`state`]: materialized state, load supersession, item signals
//! - [`model`]: input and output records
//! - [`error`]: error types
//!
//! ## Example
//!
//! ```
//! use chrono::{NaiveDate, Utc};
//! use history_calendar::{expand_recurring, group_by_day, normalize, HistoryItem};
//! use serde_json::json;
//!
//! let items = vec![HistoryItem::new(
//!     "h1",
//!     "Practice",
//!     json!({"event": {"start": "2025-06-02", "recurrence": "FREQ=WEEKLY;BYDAY=MO"}}),
//! )];
//! let june = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
//!
//! let events = expand_recurring(&normalize(&items, &Utc), june, &Utc);
//! assert_eq!(events.len(), 6); // every Monday from Jun 2 to Jul 7
//! assert_eq!(group_by_day(&events, &Utc).len(), 6);
//! ```

pub mod error;
pub mod grid;
pub mod local_date;
pub mod model;
pub mod normalize;
pub mod recurrence;
pub mod state;
pub mod views;

pub use error::{CalendarError, RecurrenceError, Skipped};
pub use grid::{build_month_grid, shift_month, GridWindow, MonthGrid};
pub use local_date::{resolve_local_date, start_of_day};
pub use model::{decode_history_page, is_shared, CalendarEvent, HistoryItem, SHARED_CATEGORY};
pub use normalize::{normalize, normalize_item, normalize_with_report, Candidate, NormalizeReport};
pub use recurrence::{
    dedup_key, expand_recurring, expand_recurring_with_report, DedupKey, ExpansionReport,
    WeeklyRule,
};
pub use state::{
    CalendarSignal, CalendarState, HistorySource, LoadOutcome, LoadTicket, SignalBus,
    SignalSubscriber, SubscriptionId,
};
pub use views::{
    group_by_calendar_month, group_by_day, group_by_iso_week, shared_upcoming, upcoming,
    upcoming_within_days, DayKey, MonthGroup, WeekGroup,
};
