//! Normalization of stored history payloads into [`CalendarEvent`]s.
//!
//! A history item's `data` arrives in one of three shapes, checked in order:
//!
//! 1. `data.events` is an array: one event per entry, id `"{item}-{idx}"`.
//!    An empty array means zero events; it does not fall through.
//! 2. `data.event`, or `data` itself, has a start-like field: one event,
//!    id `"{item}-0"`.
//! 3. Anything else yields no events.
//!
//! Each field is resolved from an ordered [`Candidate`] table, first match
//! wins. Per-event keys come before item-level `data` keys, so item-level
//! values only fill gaps.

use chrono::TimeZone;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Skipped;
use crate::local_date::{is_date_only, resolve_local_date};
use crate::model::{CalendarEvent, HistoryItem, SHARED_CATEGORY};

/// One place a field value may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// A key on the per-event object.
    Event(&'static str),
    /// A key on the item-level `data` object.
    Item(&'static str),
    /// The history item's own title.
    ItemTitle,
}

pub const START: &[Candidate] = &[Candidate::Event("start"), Candidate::Event("startISO")];
pub const END: &[Candidate] = &[Candidate::Event("end"), Candidate::Event("endISO")];
pub const TITLE: &[Candidate] = &[
    Candidate::Event("title"),
    Candidate::Event("summary"),
    Candidate::Event("name"),
    Candidate::Item("title"),
    Candidate::ItemTitle,
];
pub const VENUE: &[Candidate] = &[Candidate::Event("venue"), Candidate::Item("venue")];
pub const LOCATION: &[Candidate] = &[Candidate::Event("location"), Candidate::Item("location")];
pub const TIMEZONE: &[Candidate] = &[
    Candidate::Event("timezone"),
    Candidate::Event("tz"),
    Candidate::Item("timezone"),
];
pub const DESCRIPTION: &[Candidate] = &[
    Candidate::Event("description"),
    Candidate::Item("description"),
];
pub const RSVP: &[Candidate] = &[Candidate::Event("rsvp"), Candidate::Item("rsvp")];
pub const CATEGORY: &[Candidate] = &[Candidate::Event("category"), Candidate::Item("category")];
pub const RECURRENCE: &[Candidate] = &[
    Candidate::Event("recurrence"),
    Candidate::Event("rrule"),
    Candidate::Item("recurrence"),
];
pub const ALL_DAY: &[Candidate] = &[
    Candidate::Event("allDay"),
    Candidate::Event("all_day"),
    Candidate::Item("allDay"),
];
pub const SHARED: &[Candidate] = &[Candidate::Event("shared"), Candidate::Item("shared")];
pub const SHARED_OUT: &[Candidate] = &[Candidate::Event("sharedOut"), Candidate::Item("sharedOut")];

/// Events from one history item, plus the entries that were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedItem {
    pub events: Vec<CalendarEvent>,
    pub skipped: Vec<Skipped>,
}

/// Events from a whole batch, plus every skip keyed by history id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub events: Vec<CalendarEvent>,
    pub skipped: Vec<(String, Skipped)>,
}

/// Normalize a batch of history items. Malformed items contribute nothing.
pub fn normalize<Z: TimeZone>(items: &[HistoryItem], zone: &Z) -> Vec<CalendarEvent> {
    normalize_with_report(items, zone).events
}

/// Like [`normalize`], but keeps the reason for every dropped item or entry.
pub fn normalize_with_report<Z: TimeZone>(items: &[HistoryItem], zone: &Z) -> NormalizeReport {
    let mut report = NormalizeReport::default();

    for item in items {
        match normalize_item(item, zone) {
            Ok(normalized) => {
                report.events.extend(normalized.events);
                for reason in normalized.skipped {
                    debug!(history_id = %item.id, %reason, "dropped event entry");
                    report.skipped.push((item.id.clone(), reason));
                }
            }
            Err(reason) => {
                debug!(history_id = %item.id, %reason, "history item has no events");
                report.skipped.push((item.id.clone(), reason));
            }
        }
    }

    debug!(
        items = items.len(),
        events = report.events.len(),
        skipped = report.skipped.len(),
        "normalized history items"
    );
    report
}

/// Normalize one history item.
///
/// # Errors
///
/// Returns [`Skipped::NoEventShape`] when the payload matches none of the
/// three shapes, or [`Skipped::UndecodablePayload`] for a string payload that
/// is not JSON. Entries dropped inside an events list are reported in
/// [`NormalizedItem::skipped`] instead.
pub fn normalize_item<Z: TimeZone>(
    item: &HistoryItem,
    zone: &Z,
) -> Result<NormalizedItem, Skipped> {
    let decoded;
    let data = match &item.data {
        Value::String(raw) => {
            decoded = serde_json::from_str::<Value>(raw).map_err(|_| Skipped::UndecodablePayload)?;
            &decoded
        }
        other => other,
    };
    let item_data = data.as_object();

    let mut normalized = NormalizedItem::default();

    if let Some(Value::Array(entries)) = data.get("events") {
        for (index, entry) in entries.iter().enumerate() {
            let Some(entry) = entry.as_object() else {
                normalized.skipped.push(Skipped::EntryNotObject { index });
                continue;
            };
            match build_event(item, item_data, entry, index, zone) {
                Ok(event) => normalized.events.push(event),
                Err(reason) => normalized.skipped.push(reason),
            }
        }
        return Ok(normalized);
    }

    let single = data
        .get("event")
        .and_then(Value::as_object)
        .filter(|event| has_start_field(event))
        .or_else(|| item_data.filter(|map| has_start_field(map)))
        .ok_or(Skipped::NoEventShape)?;

    match build_event(item, item_data, single, 0, zone) {
        Ok(event) => normalized.events.push(event),
        Err(reason) => normalized.skipped.push(reason),
    }
    Ok(normalized)
}

fn has_start_field(map: &Map<String, Value>) -> bool {
    START.iter().any(|candidate| match candidate {
        Candidate::Event(key) => map.contains_key(*key),
        _ => false,
    })
}

fn build_event<Z: TimeZone>(
    item: &HistoryItem,
    item_data: Option<&Map<String, Value>>,
    entry: &Map<String, Value>,
    index: usize,
    zone: &Z,
) -> Result<CalendarEvent, Skipped> {
    let sources = Sources {
        item,
        item_data,
        entry,
    };

    let start = sources
        .string(START)
        .ok_or(Skipped::MissingStart { index })?;
    if resolve_local_date(&start, zone).is_none() {
        return Err(Skipped::UnparseableStart {
            index,
            value: start,
        });
    }

    let category = sources.string(CATEGORY);
    let shared = sources.flag(SHARED).unwrap_or(false)
        || category.as_deref() == Some(SHARED_CATEGORY);

    Ok(CalendarEvent {
        id: format!("{}-{}", item.id, index),
        history_id: item.id.clone(),
        title: sources.string(TITLE).unwrap_or_default(),
        all_day: sources
            .flag(ALL_DAY)
            .unwrap_or_else(|| is_date_only(&start)),
        end: sources.string(END),
        timezone: sources.string(TIMEZONE),
        location: sources.string(LOCATION),
        venue: sources.string(VENUE),
        description: sources.string(DESCRIPTION),
        rsvp: sources.string(RSVP),
        recurrence: sources.string(RECURRENCE),
        shared_out: sources.flag(SHARED_OUT).unwrap_or(false),
        shared,
        category,
        start,
    })
}

struct Sources<'a> {
    item: &'a HistoryItem,
    item_data: Option<&'a Map<String, Value>>,
    entry: &'a Map<String, Value>,
}

impl<'a> Sources<'a> {
    fn value(&self, candidate: Candidate) -> Option<&'a Value> {
        match candidate {
            Candidate::Event(key) => self.entry.get(key),
            Candidate::Item(key) => self.item_data?.get(key),
            Candidate::ItemTitle => None,
        }
    }

    /// First non-blank string, trimmed.
    fn string(&self, table: &[Candidate]) -> Option<String> {
        table.iter().find_map(|&candidate| {
            let raw = match candidate {
                Candidate::ItemTitle => self.item.title.as_str(),
                _ => self.value(candidate)?.as_str()?,
            };
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
    }

    fn flag(&self, table: &[Candidate]) -> Option<bool> {
        table
            .iter()
            .find_map(|&candidate| self.value(candidate)?.as_bool())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
