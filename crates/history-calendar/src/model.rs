//! Input records and the canonical event shape.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{CalendarError, Result};

/// Category that marks an event as shared even without an explicit flag.
pub const SHARED_CATEGORY: &str = "Shared events";

/// A persisted record from the history store. May encode zero or more events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, alias = "created_at", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl HistoryItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            data,
            created_at: None,
        }
    }
}

/// A render-ready event derived from a [`HistoryItem`].
///
/// Events carry no persisted identity. They are rebuilt from history items on
/// every load, so `id` is only unique within one materialized batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalendarEvent {
    pub id: String,
    /// Back-reference to the originating history item.
    pub history_id: String,
    pub title: String,
    /// Date-only (`YYYY-MM-DD`) or a full timestamp.
    pub start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    pub all_day: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsvp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// `FREQ=WEEKLY;BYDAY=...` style rule, if the event repeats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
    pub shared: bool,
    pub shared_out: bool,
}

/// Whether an event belongs in the shared view.
pub fn is_shared(event: &CalendarEvent) -> bool {
    event.shared || event.shared_out || event.category.as_deref() == Some(SHARED_CATEGORY)
}

/// Decode a history fetch response.
///
/// Accepts `{ "items": [...] }` or a bare array. Entries that do not decode as
/// a [`HistoryItem`] are skipped so one corrupt record cannot hide the rest.
///
/// # Errors
///
/// Returns [`CalendarError::Decode`] if the body is not JSON, or
/// [`CalendarError::Fetch`] if it carries no item list.
pub fn decode_history_page(body: &str) -> Result<Vec<HistoryItem>> {
    let value: Value = serde_json::from_str(body)?;
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(CalendarError::Fetch(
                    "response has no items array".to_string(),
                ))
            }
        },
        _ => {
            return Err(CalendarError::Fetch(
                "response is neither an object nor an array".to_string(),
            ))
        }
    };

    let mut items = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<HistoryItem>(entry) {
            Ok(item) => items.push(item),
            Err(e) => debug!(index = idx, error = %e, "skipping undecodable history item"),
        }
    }
    Ok(items)
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
