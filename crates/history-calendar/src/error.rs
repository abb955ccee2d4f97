//! Error types for history-calendar operations.
//!
//! Only [`CalendarError`] ever reaches a caller as a failure. [`Skipped`] and
//! [`RecurrenceError`] describe records or expansions that were dropped
//! locally; they are returned inside reports so tests and callers can see why.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}

pub type Result<T> = std::result::Result<T, CalendarError>;

/// Why a history item (or one entry inside it) produced no event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Skipped {
    #[error("payload has no events list and no start-like field")]
    NoEventShape,

    #[error("payload is a string that does not decode as JSON")]
    UndecodablePayload,

    #[error("events[{index}] is not an object")]
    EntryNotObject { index: usize },

    #[error("events[{index}] has no start")]
    MissingStart { index: usize },

    #[error("events[{index}] has unparseable start '{value}'")]
    UnparseableStart { index: usize, value: String },
}

/// Why weekly expansion was abandoned for one event. The base event is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("BYDAY component is empty")]
    EmptyByDay,

    #[error("BYDAY has no recognised weekday code: '{0}'")]
    NoKnownWeekday(String),

    #[error("event start '{0}' cannot be resolved")]
    UnparseableStart(String),

    #[error("occurrence date is out of range")]
    UnrepresentableDate,
}
