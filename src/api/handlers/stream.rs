//! Server-sent event stream of session lifecycle and event-bus messages.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::api::state::AppState;
use crate::bus::BusMessage;

/// Subscribes before reading the snapshot, so any message published during
/// the snapshot read is queued on the subscriber's channel rather than lost.
pub async fn stream_sessions(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.bus.subscribe();
    let snapshot = state.sessions.list_sessions().await.unwrap_or_default();

    let initial = futures::stream::iter(snapshot.into_iter().map(|session| {
        let payload = serde_json::json!({"kind": "session_snapshot", "session": session});
        Ok(Event::default().json_data(payload).unwrap_or_default())
    }));

    let live = BroadcastStream::new(receiver).filter_map(|msg| match msg {
        Ok(message) => Some(Ok(to_sse_event(message))),
        Err(_lagged) => Some(Ok(Event::default()
            .event("lagged")
            .data("subscriber fell behind, reconnect and resync via /sessions"))),
    });

    Sse::new(initial.chain(live)).keep_alive(KeepAlive::default())
}

fn to_sse_event(message: BusMessage) -> Event {
    Event::default()
        .json_data(message)
        .unwrap_or_else(|_| Event::default().data("{}"))
}
