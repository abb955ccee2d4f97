//! Materialized calendar state, load supersession and item signals.
//!
//! [`CalendarState`] keeps the last successfully fetched history items and
//! the events derived from them for the visible month. Each fetch is tagged
//! with a [`LoadTicket`]; only the most recently issued ticket may apply its
//! result, so a slow response for an old month cannot overwrite a newer one.
//!
//! Events are never patched in place. Every change runs the
//! normalize → expand pipeline again and replaces the list wholesale.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{NaiveDate, TimeZone};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::grid::{build_month_grid, MonthGrid};
use crate::model::{CalendarEvent, HistoryItem};
use crate::normalize::normalize;
use crate::recurrence::expand_recurring;

/// The persistence collaborator that supplies history items.
pub trait HistorySource {
    fn fetch(&self) -> Result<Vec<HistoryItem>>;
}

impl<F> HistorySource for F
where
    F: Fn() -> Result<Vec<HistoryItem>>,
{
    fn fetch(&self) -> Result<Vec<HistoryItem>> {
        self()
    }
}

/// Token for one fetch. Stale once a newer ticket has been issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    anchor: NaiveDate,
}

impl LoadTicket {
    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The result replaced the state; `events` is the new batch size.
    Applied { events: usize },
    /// A newer load was started; the result was discarded.
    Stale,
    /// The fetch failed; prior events are kept and the error is recorded.
    Failed(String),
}

/// Notifications published by the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CalendarSignal {
    ItemCreated(HistoryItem),
    ItemDeleted { id: String },
}

pub trait SignalSubscriber {
    fn on_signal(&mut self, signal: &CalendarSignal);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

/// Observer registry connecting publishers of [`CalendarSignal`]s to
/// subscribers. Single-threaded, like the rest of the pipeline.
#[derive(Default)]
pub struct SignalBus {
    next_id: usize,
    subscribers: Vec<(SubscriptionId, Rc<RefCell<dyn SignalSubscriber>>)>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Rc<RefCell<dyn SignalSubscriber>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, subscriber));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    /// Deliver `signal` to every subscriber in subscription order.
    ///
    /// A subscriber that is already borrowed is skipped. Returns the number
    /// of subscribers reached.
    pub fn publish(&self, signal: &CalendarSignal) -> usize {
        let mut reached = 0;
        for (id, subscriber) in &self.subscribers {
            match subscriber.try_borrow_mut() {
                Ok(mut subscriber) => {
                    subscriber.on_signal(signal);
                    reached += 1;
                }
                Err(_) => warn!(subscription = id.0, "subscriber busy, signal dropped"),
            }
        }
        reached
    }
}

/// Events materialized for one visible month.
#[derive(Debug, Clone)]
pub struct CalendarState<Z: TimeZone> {
    zone: Z,
    anchor: NaiveDate,
    items: Vec<HistoryItem>,
    events: Vec<CalendarEvent>,
    generation: u64,
    load_error: Option<String>,
}

impl<Z: TimeZone> CalendarState<Z> {
    pub fn new(zone: Z, anchor: NaiveDate) -> Self {
        Self {
            zone,
            anchor,
            items: Vec::new(),
            events: Vec::new(),
            generation: 0,
            load_error: None,
        }
    }

    pub fn zone(&self) -> &Z {
        &self.zone
    }

    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    pub fn grid(&self) -> MonthGrid {
        build_month_grid(self.anchor)
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    /// Message of the most recent failed load, cleared by the next success.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Start a load for `anchor`'s month. Supersedes every earlier ticket.
    pub fn begin_load(&mut self, anchor: NaiveDate) -> LoadTicket {
        self.generation += 1;
        debug!(generation = self.generation, %anchor, "load started");
        LoadTicket {
            generation: self.generation,
            anchor,
        }
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Apply the result of the fetch started with `ticket`.
    ///
    /// Stale tickets change nothing, whether their fetch succeeded or not.
    /// A failure keeps the previous events rather than showing a partial set.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<HistoryItem>>,
    ) -> LoadOutcome {
        if !self.is_current(&ticket) {
            warn!(
                generation = ticket.generation,
                current = self.generation,
                "discarding superseded load"
            );
            return LoadOutcome::Stale;
        }

        match result {
            Ok(items) => {
                self.anchor = ticket.anchor;
                self.items = items;
                self.load_error = None;
                self.rematerialize();
                LoadOutcome::Applied {
                    events: self.events.len(),
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "history load failed");
                self.load_error = Some(message.clone());
                LoadOutcome::Failed(message)
            }
        }
    }

    /// Fetch from `source` and apply the result in one step.
    pub fn load_from<S>(&mut self, source: &S, anchor: NaiveDate) -> LoadOutcome
    where
        S: HistorySource + ?Sized,
    {
        let ticket = self.begin_load(anchor);
        let result = source.fetch();
        self.finish_load(ticket, result)
    }

    /// Switch the visible month using the items already held.
    ///
    /// Pending loads for the old month become stale. The returned ticket can
    /// be used to refresh the new month from the source.
    pub fn show_month(&mut self, anchor: NaiveDate) -> LoadTicket {
        let ticket = self.begin_load(anchor);
        self.anchor = anchor;
        self.rematerialize();
        ticket
    }

    /// Handle a create or delete notification from the persistence layer.
    pub fn apply(&mut self, signal: &CalendarSignal) {
        match signal {
            CalendarSignal::ItemCreated(item) => {
                self.items.retain(|existing| existing.id != item.id);
                self.items.push(item.clone());
                self.rematerialize();
            }
            CalendarSignal::ItemDeleted { id } => {
                self.items.retain(|existing| existing.id != *id);
                let before = self.events.len();
                self.events.retain(|event| event.history_id != *id);
                debug!(history_id = %id, pruned = before - self.events.len(), "item deleted");
            }
        }
    }

    fn rematerialize(&mut self) {
        let normalized = normalize(&self.items, &self.zone);
        self.events = expand_recurring(&normalized, self.anchor, &self.zone);
        info!(
            items = self.items.len(),
            base_events = normalized.len(),
            events = self.events.len(),
            month = %self.anchor.format("%Y-%m"),
            "materialized calendar events"
        );
    }
}

impl<Z: TimeZone> SignalSubscriber for CalendarState<Z> {
    fn on_signal(&mut self, signal: &CalendarSignal) {
        self.apply(signal);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CalendarError;
    use chrono::Utc;
    use serde_json::json;

    fn june() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    fn practice() -> HistoryItem {
        HistoryItem::new(
            "h1",
            "Practice",
            json!({"event": {"start": "2025-06-02", "recurrence": "FREQ=WEEKLY;BYDAY=MO"}}),
        )
    }

    fn concert() -> HistoryItem {
        HistoryItem::new("h2", "Concert", json!({"start": "2025-06-20T20:00:00Z"}))
    }

    fn serve(items: Vec<HistoryItem>) -> impl HistorySource {
        move || -> Result<Vec<HistoryItem>> { Ok(items.clone()) }
    }

    fn fail(message: &str) -> impl HistorySource {
        let message = message.to_string();
        move || -> Result<Vec<HistoryItem>> { Err(CalendarError::Fetch(message.clone())) }
    }

    // ── loads ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_materializes_and_expands() {
        let mut state = CalendarState::new(Utc, june());
        let outcome = state.load_from(&serve(vec![practice(), concert()]), june());
        // Six Mondays plus the concert
        assert_eq!(outcome, LoadOutcome::Applied { events: 7 });
        assert_eq!(state.items().len(), 2);
        assert!(state.load_error().is_none());
    }

    #[test]
    fn test_stale_success_is_discarded() {
        let mut state = CalendarState::new(Utc, june());
        let july = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();

        let first = state.begin_load(june());
        let second = state.begin_load(july);
        assert!(!state.is_current(&first));

        // The newer request resolves first
        assert_eq!(
            state.finish_load(second, Ok(vec![concert()])),
            LoadOutcome::Applied { events: 1 }
        );
        assert_eq!(
            state.finish_load(first, Ok(vec![practice(), concert()])),
            LoadOutcome::Stale
        );
        assert_eq!(state.anchor(), july);
        assert_eq!(state.items().len(), 1);
    }

    #[test]
    fn test_stale_failure_is_discarded() {
        let mut state = CalendarState::new(Utc, june());
        let first = state.begin_load(june());
        let second = state.begin_load(june());
        state.finish_load(second, Ok(vec![concert()]));
        let outcome = state.finish_load(first, Err(CalendarError::Fetch("timeout".into())));
        assert_eq!(outcome, LoadOutcome::Stale);
        assert!(state.load_error().is_none());
    }

    #[test]
    fn test_failure_keeps_previous_events() {
        let mut state = CalendarState::new(Utc, june());
        state.load_from(&serve(vec![concert()]), june());

        let outcome = state.load_from(&fail("connection reset"), june());
        assert!(matches!(outcome, LoadOutcome::Failed(ref m) if m.contains("connection reset")));
        assert_eq!(state.events().len(), 1);
        assert!(state.load_error().unwrap().contains("connection reset"));

        state.load_from(&serve(vec![concert(), practice()]), june());
        assert!(state.load_error().is_none());
    }

    #[test]
    fn test_show_month_reexpands_and_supersedes() {
        let mut state = CalendarState::new(Utc, june());
        state.load_from(&serve(vec![practice()]), june());
        let pending = state.begin_load(june());

        let august = NaiveDate::from_ymd_opt(2025, 8, 10).unwrap();
        let refresh = state.show_month(august);
        assert_eq!(refresh.anchor(), august);
        assert!(!state.is_current(&pending));
        assert_eq!(state.grid().month, 8);
        // Base event in June, plus Mondays Jul 28 through Sep 1 in the August grid
        assert_eq!(state.events().len(), 7);
    }

    // ── signals ─────────────────────────────────────────────────────────

    #[test]
    fn test_item_created_merges_without_refetch() {
        let mut state = CalendarState::new(Utc, june());
        state.load_from(&serve(vec![concert()]), june());
        state.apply(&CalendarSignal::ItemCreated(practice()));
        assert_eq!(state.events().len(), 7);
        assert!(state.events().iter().any(|e| e.history_id == "h1"));
    }

    #[test]
    fn test_item_created_replaces_same_id() {
        let mut state = CalendarState::new(Utc, june());
        state.load_from(&serve(vec![concert()]), june());
        let moved = HistoryItem::new("h2", "Concert", json!({"start": "2025-06-21T20:00:00Z"}));
        state.apply(&CalendarSignal::ItemCreated(moved));
        assert_eq!(state.events().len(), 1);
        assert_eq!(state.events()[0].start, "2025-06-21T20:00:00Z");
    }

    #[test]
    fn test_item_deleted_prunes_all_its_events() {
        let mut state = CalendarState::new(Utc, june());
        state.load_from(&serve(vec![practice(), concert()]), june());
        state.apply(&CalendarSignal::ItemDeleted { id: "h1".into() });
        assert_eq!(state.events().len(), 1);
        assert!(state.events().iter().all(|e| e.history_id == "h2"));
        assert_eq!(state.items().len(), 1);
    }

    #[test]
    fn test_bus_delivers_to_subscribers() {
        let state = Rc::new(RefCell::new(CalendarState::new(Utc, june())));
        state.borrow_mut().load_from(&serve(vec![practice()]), june());

        let mut bus = SignalBus::new();
        let id = bus.subscribe(state.clone());
        assert_eq!(bus.publish(&CalendarSignal::ItemCreated(concert())), 1);
        assert_eq!(state.borrow().events().len(), 7);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish(&CalendarSignal::ItemDeleted { id: "h2".into() }), 0);
        assert_eq!(state.borrow().events().len(), 7);
    }

    #[test]
    fn test_bus_skips_borrowed_subscriber() {
        let held = Rc::new(RefCell::new(CalendarState::new(Utc, june())));
        let free = Rc::new(RefCell::new(CalendarState::new(Utc, june())));

        let mut bus = SignalBus::new();
        bus.subscribe(held.clone());
        bus.subscribe(free.clone());

        let guard = held.borrow();
        assert_eq!(bus.publish(&CalendarSignal::ItemCreated(concert())), 1);
        assert!(guard.items().is_empty());
        drop(guard);

        assert_eq!(free.borrow().items().len(), 1);
        assert!(held.borrow().items().is_empty());
    }
}
