//! # Server-Sent Events
//!
//! `GET /events` and `GET /events/{category}`.
//!
//! A subscription is opened against the directory's event hub, then a pump
//! task forwards it into a bounded channel that the response body drains:
//! first the replay after `Last-Event-ID` (spaced by the configured delay),
//! then live events from the category channels. Live events already covered
//! by the replay are skipped. A lagging subscriber loses the oldest events
//! and the loss is logged.

use super::{
    AppState,
    types::{ApiError, EventParams},
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures_util::stream::{Stream, StreamExt, select_all};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream, errors::BroadcastStreamRecvError};
use wotdir_core::{Event, EventCategory, Subscription};

/// Buffered frames per connection before the pump waits on the client.
const CONNECTION_BUFFER: usize = 64;

const LAST_EVENT_ID: &str = "last-event-id";

// =============================================================================
// HANDLERS
// =============================================================================

/// Every category.
pub async fn all_events_handler(
    State(state): State<AppState>,
    Query(params): Query<EventParams>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    open_stream(&state, &params, &headers, &EventCategory::ALL)
}

/// One category, by wire name.
pub async fn category_events_handler(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<EventParams>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let category: EventCategory = category.parse()?;
    open_stream(&state, &params, &headers, &[category])
}

fn open_stream(
    state: &AppState,
    params: &EventParams,
    headers: &HeaderMap,
    categories: &[EventCategory],
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>> + use<>>, ApiError> {
    if params.diff.is_some() {
        return Err(ApiError::NotImplemented(
            "Diff notifications are not supported".to_string(),
        ));
    }

    let since = headers.get(LAST_EVENT_ID).and_then(|v| v.to_str().ok());
    let subscription = state.directory.subscribe(categories, since)?;
    tracing::info!(
        event = "sse_subscribed",
        categories = ?categories,
        replay = subscription.replay.len(),
        "SSE subscriber connected"
    );

    let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
    tokio::spawn(pump(subscription, state.replay_delay, tx));

    let stream = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(frame(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// =============================================================================
// PUMP
// =============================================================================

/// One SSE frame: `id`, `event` and `data` lines.
#[must_use]
pub fn frame(event: &Event) -> SseEvent {
    SseEvent::default()
        .id(event.sequence_id.to_string())
        .event(event.category.wire_name())
        .data(event.payload.as_str())
}

/// Forward replay, then live events, until the client goes away.
pub async fn pump(subscription: Subscription, replay_delay: Duration, tx: mpsc::Sender<Event>) {
    let Subscription {
        replay,
        receivers,
        cursor,
    } = subscription;

    for event in replay {
        if tx.send(event).await.is_err() {
            return;
        }
        if !replay_delay.is_zero() {
            tokio::time::sleep(replay_delay).await;
        }
    }

    let mut live = select_all(receivers.into_iter().map(BroadcastStream::new));
    loop {
        tokio::select! {
            () = tx.closed() => break,
            next = live.next() => match next {
                Some(Ok(event)) if cursor.covers(&event) => {}
                Some(Ok(event)) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(
                        event = "sse_lagged",
                        skipped,
                        "Subscriber too slow, dropped oldest events"
                    );
                }
                None => break,
            },
        }
    }
    tracing::debug!(event = "sse_closed", "SSE subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wotdir_core::{Directory, DirectoryConfig, MemoryStore};

    fn thing(id: &str) -> serde_json::Value {
        json!({
            "@context": "https://www.w3.org/2022/wot/td/v1.1",
            "id": id,
            "title": id,
            "securityDefinitions": {"nosec_sc": {"scheme": "nosec"}},
            "security": ["nosec_sc"]
        })
    }

    async fn next(rx: &mut mpsc::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timely")
            .expect("open")
    }

    #[tokio::test]
    async fn replay_then_live_without_duplicates() {
        let dir = Directory::new(MemoryStore::new(), DirectoryConfig::default());
        dir.upsert(thing("urn:a")).expect("create a");
        dir.upsert(thing("urn:b")).expect("create b");

        let sub = dir
            .subscribe(&EventCategory::ALL, Some("-1"))
            .expect("subscribe");
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(pump(sub, Duration::ZERO, tx));

        assert_eq!(next(&mut rx).await.sequence_id, 0);
        assert_eq!(next(&mut rx).await.sequence_id, 1);

        dir.delete("urn:a").expect("delete");
        let live = next(&mut rx).await;
        assert_eq!(live.sequence_id, 2);
        assert_eq!(live.category, EventCategory::Deleted);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("pump stops")
            .expect("join");
    }

    #[tokio::test]
    async fn category_subscription_filters_live_events() {
        let dir = Directory::new(MemoryStore::new(), DirectoryConfig::default());
        let sub = dir
            .subscribe(&[EventCategory::Deleted], None)
            .expect("subscribe");
        assert!(sub.replay.is_empty());
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(pump(sub, Duration::ZERO, tx));

        dir.upsert(thing("urn:a")).expect("create");
        dir.delete("urn:a").expect("delete");

        let event = next(&mut rx).await;
        assert_eq!(event.category, EventCategory::Deleted);
        assert_eq!(event.payload, r#"{"id":"urn:a"}"#);
    }
}
