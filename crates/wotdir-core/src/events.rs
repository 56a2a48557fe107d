//! # Change Events
//!
//! - [`EventLog`]: append-only, gap-free sequence of change events, kept for
//!   the process lifetime and replayable by cursor.
//! - [`EventBus`]: one bounded broadcast channel per category. A slow
//!   receiver loses the oldest events and is told how many; senders never
//!   wait.
//! - [`EventHub`]: log and bus together. Events are recorded in commit
//!   order and published in that same order.
//! - [`Subscription`]: live receivers plus a one-shot replay, opened in that
//!   order so nothing falls between them.

use crate::DirectoryError;
use crate::types::{acquire_lock, read_lock, write_lock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

// =============================================================================
// EVENTS
// =============================================================================

/// Kind of change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    #[serde(rename = "thing_created")]
    Created,
    #[serde(rename = "thing_updated")]
    Updated,
    #[serde(rename = "thing_deleted")]
    Deleted,
}

impl EventCategory {
    pub const ALL: [Self; 3] = [Self::Created, Self::Updated, Self::Deleted];

    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Created => "thing_created",
            Self::Updated => "thing_updated",
            Self::Deleted => "thing_deleted",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for EventCategory {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.wire_name() == s)
            .ok_or_else(|| DirectoryError::MalformedRequest(format!("unknown event type: {s}")))
    }
}

/// One committed change. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub category: EventCategory,
    pub sequence_id: u64,
    /// JSON text `{"id":"<id>"}`.
    pub payload: String,
}

/// Payload carried by every thing event.
#[must_use]
pub fn thing_payload(id: &str) -> String {
    serde_json::json!({ "id": id }).to_string()
}

// =============================================================================
// EVENT LOG
// =============================================================================

/// Append-only event history with gap-free sequence ids starting at 0.
#[derive(Debug, Default)]
pub struct EventLog {
    next: AtomicU64,
    events: RwLock<Vec<Event>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence id and store the event.
    pub fn append(
        &self,
        category: EventCategory,
        payload: String,
    ) -> Result<Event, DirectoryError> {
        let mut events = write_lock(&self.events, "event log")?;
        let event = Event {
            category,
            sequence_id: self.next.fetch_add(1, Ordering::SeqCst),
            payload,
        };
        events.push(event.clone());
        Ok(event)
    }

    /// Events after the cursor whose category is in `categories`, oldest first.
    ///
    /// An absent or unparseable cursor yields nothing. `-1` yields everything.
    pub fn replay(
        &self,
        since: Option<&str>,
        categories: &[EventCategory],
    ) -> Result<Vec<Event>, DirectoryError> {
        let Some(since) = since.and_then(|s| s.trim().parse::<i64>().ok()) else {
            return Ok(Vec::new());
        };
        let start = if since < 0 { 0 } else { (since as u64).saturating_add(1) };

        let events = read_lock(&self.events, "event log")?;
        let start = usize::try_from(start).unwrap_or(usize::MAX).min(events.len());
        Ok(events[start..]
            .iter()
            .filter(|e| categories.contains(&e.category))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> Result<usize, DirectoryError> {
        Ok(read_lock(&self.events, "event log")?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DirectoryError> {
        Ok(self.len()? == 0)
    }
}

// =============================================================================
// EVENT BUS
// =============================================================================

/// Per-category broadcast channels.
#[derive(Debug)]
pub struct EventBus {
    channels: BTreeMap<EventCategory, broadcast::Sender<Event>>,
}

impl EventBus {
    /// Create a bus whose channels each buffer `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let channels = EventCategory::ALL
            .into_iter()
            .map(|category| (category, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self { channels }
    }

    /// Deliver to every receiver of the event's category. Returns the number
    /// of receivers reached; zero is not an error.
    pub fn publish(&self, event: &Event) -> usize {
        let Some(sender) = self.channels.get(&event.category) else {
            return 0;
        };
        match sender.send(event.clone()) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!(
                    sequence_id = event.sequence_id,
                    category = %event.category,
                    "no subscribers"
                );
                0
            }
        }
    }

    pub fn subscribe(&self, category: EventCategory) -> Option<broadcast::Receiver<Event>> {
        self.channels.get(&category).map(broadcast::Sender::subscribe)
    }

    #[must_use]
    pub fn subscriber_count(&self, category: EventCategory) -> usize {
        self.channels
            .get(&category)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(crate::primitives::DEFAULT_EVENT_CAPACITY)
    }
}

// =============================================================================
// HUB
// =============================================================================

/// Recorded events waiting for their turn on the bus.
#[derive(Debug, Default)]
struct Outbox {
    next: u64,
    ready: BTreeMap<u64, Event>,
}

/// Log and bus together.
///
/// Writers [`record`](Self::record) an event while their commit is still
/// exclusive, so log order is commit order. [`release`](Self::release) may be
/// called out of order; the bus still sees events in sequence order.
#[derive(Debug)]
pub struct EventHub {
    log: EventLog,
    bus: EventBus,
    outbox: Mutex<Outbox>,
}

impl EventHub {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            log: EventLog::new(),
            bus: EventBus::with_capacity(capacity),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Append a thing event to the log without publishing it.
    pub fn record(&self, category: EventCategory, id: &str) -> Result<Event, DirectoryError> {
        self.log.append(category, thing_payload(id))
    }

    /// Hand a recorded event to the bus. Publishes it, and any later events
    /// released before it, once every earlier event has been released.
    /// Returns how many events went out.
    pub fn release(&self, event: Event) -> Result<usize, DirectoryError> {
        let mut outbox = acquire_lock(&self.outbox, "event hub")?;
        outbox.ready.insert(event.sequence_id, event);

        let mut published = 0;
        loop {
            let next = outbox.next;
            let Some(event) = outbox.ready.remove(&next) else {
                break;
            };
            let receivers = self.bus.publish(&event);
            tracing::debug!(
                sequence_id = event.sequence_id,
                category = %event.category,
                receivers,
                "event published"
            );
            outbox.next = next.saturating_add(1);
            published += 1;
        }
        Ok(published)
    }

    /// Record and release in one step.
    pub fn emit(&self, category: EventCategory, id: &str) -> Result<Event, DirectoryError> {
        let event = self.record(category, id)?;
        self.release(event.clone())?;
        Ok(event)
    }

    pub fn subscribe(
        &self,
        categories: &[EventCategory],
        since: Option<&str>,
    ) -> Result<Subscription, DirectoryError> {
        Subscription::open(&self.log, &self.bus, categories, since)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::with_capacity(crate::primitives::DEFAULT_EVENT_CAPACITY)
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Highest sequence id already delivered by replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayCursor(Option<u64>);

impl ReplayCursor {
    /// Whether a live event was already delivered through replay.
    #[must_use]
    pub fn covers(self, event: &Event) -> bool {
        self.0.is_some_and(|last| event.sequence_id <= last)
    }
}

/// Replay snapshot plus live receivers for a set of categories.
#[derive(Debug)]
pub struct Subscription {
    pub replay: Vec<Event>,
    pub receivers: Vec<broadcast::Receiver<Event>>,
    pub cursor: ReplayCursor,
}

impl Subscription {
    /// Open receivers on `bus`, then take the replay snapshot from `log`.
    pub fn open(
        log: &EventLog,
        bus: &EventBus,
        categories: &[EventCategory],
        since: Option<&str>,
    ) -> Result<Self, DirectoryError> {
        let receivers = categories
            .iter()
            .filter_map(|category| bus.subscribe(*category))
            .collect();
        let replay = log.replay(since, categories)?;
        let cursor = ReplayCursor(replay.last().map(|e| e.sequence_id));
        Ok(Self {
            replay,
            receivers,
            cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn log_with_history() -> EventLog {
        let log = EventLog::new();
        log.append(EventCategory::Created, thing_payload("urn:a"))
            .expect("append");
        log.append(EventCategory::Updated, thing_payload("urn:a"))
            .expect("append");
        log.append(EventCategory::Created, thing_payload("urn:b"))
            .expect("append");
        log
    }

    #[test]
    fn sequence_ids_start_at_zero_without_gaps() {
        let log = log_with_history();
        let all = log.replay(Some("-1"), &EventCategory::ALL).expect("replay");
        let ids: Vec<u64> = all.iter().map(|e| e.sequence_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(all[0].payload, r#"{"id":"urn:a"}"#);
    }

    #[test]
    fn replay_filters_by_cursor_and_category() {
        let log = log_with_history();
        let created = log
            .replay(Some("-1"), &[EventCategory::Created])
            .expect("replay");
        assert_eq!(created.len(), 2);

        let after_first = log.replay(Some("0"), &EventCategory::ALL).expect("replay");
        assert_eq!(after_first.len(), 2);
        assert!(log.replay(Some("2"), &EventCategory::ALL).expect("replay").is_empty());
        assert!(log.replay(Some("99"), &EventCategory::ALL).expect("replay").is_empty());
    }

    #[test]
    fn replay_without_usable_cursor_is_empty() {
        let log = log_with_history();
        assert!(log.replay(None, &EventCategory::ALL).expect("replay").is_empty());
        assert!(log.replay(Some("abc"), &EventCategory::ALL).expect("replay").is_empty());
        assert!(EventLog::new()
            .replay(Some("-1"), &EventCategory::ALL)
            .expect("replay")
            .is_empty());
    }

    #[test]
    fn categories_round_trip_through_wire_names() {
        for category in EventCategory::ALL {
            assert_eq!(category.wire_name().parse::<EventCategory>(), Ok(category));
        }
        assert!("thing_renamed".parse::<EventCategory>().is_err());
    }

    #[test]
    fn publish_reaches_only_matching_channel() {
        let bus = EventBus::with_capacity(8);
        let mut created = bus.subscribe(EventCategory::Created).expect("channel");
        let mut deleted = bus.subscribe(EventCategory::Deleted).expect("channel");
        let log = EventLog::new();

        let event = log
            .append(EventCategory::Created, thing_payload("urn:a"))
            .expect("append");
        assert_eq!(bus.publish(&event), 1);

        assert_eq!(created.try_recv().expect("event"), event);
        assert_eq!(deleted.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        let event = EventLog::new()
            .append(EventCategory::Deleted, thing_payload("urn:a"))
            .expect("append");
        assert_eq!(bus.publish(&event), 0);
    }

    #[test]
    fn lagging_receiver_loses_oldest_and_is_told() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe(EventCategory::Updated).expect("channel");
        let log = EventLog::new();
        for _ in 0..5 {
            let event = log
                .append(EventCategory::Updated, thing_payload("urn:a"))
                .expect("append");
            bus.publish(&event);
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Lagged(3)));
        assert_eq!(rx.try_recv().expect("event").sequence_id, 3);
        assert_eq!(rx.try_recv().expect("event").sequence_id, 4);
    }

    #[test]
    fn hub_emit_logs_then_publishes() {
        let hub = EventHub::with_capacity(4);
        let mut sub = hub
            .subscribe(&[EventCategory::Created], None)
            .expect("subscribe");
        assert!(sub.replay.is_empty());

        let event = hub.emit(EventCategory::Created, "urn:a").expect("emit");
        assert_eq!(event.sequence_id, 0);
        assert_eq!(hub.log().len().expect("len"), 1);
        assert_eq!(sub.receivers[0].try_recv().expect("live"), event);
        assert!(!sub.cursor.covers(&event));
    }

    #[test]
    fn release_out_of_order_publishes_in_sequence() {
        let hub = EventHub::with_capacity(8);
        let mut sub = hub
            .subscribe(&EventCategory::ALL, None)
            .expect("subscribe");
        let created = hub.record(EventCategory::Created, "urn:k").expect("record");
        let deleted = hub.record(EventCategory::Deleted, "urn:k").expect("record");

        assert_eq!(hub.release(deleted.clone()).expect("release"), 0);
        assert_eq!(
            sub.receivers[2].try_recv(),
            Err(TryRecvError::Empty),
            "later event waits for the earlier one"
        );
        assert_eq!(hub.release(created.clone()).expect("release"), 2);
        assert_eq!(sub.receivers[0].try_recv().expect("created"), created);
        assert_eq!(sub.receivers[2].try_recv().expect("deleted"), deleted);

        let replay = hub.log().replay(Some("-1"), &EventCategory::ALL).expect("replay");
        let order: Vec<_> = replay.iter().map(|e| (e.sequence_id, e.category)).collect();
        assert_eq!(
            order,
            vec![(0, EventCategory::Created), (1, EventCategory::Deleted)]
        );
    }

    #[test]
    fn subscription_cursor_skips_replayed_live_events() {
        let log = log_with_history();
        let bus = EventBus::with_capacity(8);
        let sub = Subscription::open(&log, &bus, &EventCategory::ALL, Some("-1"))
            .expect("subscribe");
        assert_eq!(sub.replay.len(), 3);
        assert_eq!(sub.receivers.len(), 3);

        let replayed = sub.replay[2].clone();
        assert!(sub.cursor.covers(&replayed));
        let newer = log
            .append(EventCategory::Deleted, thing_payload("urn:a"))
            .expect("append");
        assert!(!sub.cursor.covers(&newer));
    }
}
