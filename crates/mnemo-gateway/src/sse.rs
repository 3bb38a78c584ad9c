// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `GET /stream` -- Server-Sent Events fan-out of session lifecycle events
//! (spec §4.5). Deliberately mounted outside `/api/*` so it is never
//! subject to the initialization gate: a dashboard can connect and watch
//! the worker come up.
//!
//! Subscribers ride a [`tokio::sync::broadcast`] channel. A slow consumer
//! that falls behind the channel's capacity is told so via a `lagged`
//! event rather than silently dropped or allowed to backpressure the
//! emitting handler (emits are best-effort, spec §4.5).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use mnemo_session::events::{EventSink, SessionEvent};
use tokio::sync::broadcast;

use crate::server::GatewayState;

/// Capacity of the SSE broadcast channel. Slow subscribers fall behind and
/// are told so via a `lagged` event (spec §4.5 "best-effort fan-out") rather
/// than backpressuring the emitting handler.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Creates the broadcast channel both [`BroadcastSink`] (wired into
/// `SessionManager::new`) and [`crate::server::GatewayState`] share, so the
/// manager's lifecycle events reach every `/stream` subscriber.
pub fn new_event_channel() -> (broadcast::Sender<SessionEvent>, broadcast::Receiver<SessionEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

/// [`EventSink`] implementation that fans events out over a broadcast
/// channel. `emit` is synchronous and infallible from the caller's point of
/// view -- a full channel or zero subscribers is not an error (spec §4.5).
pub struct BroadcastSink(pub broadcast::Sender<SessionEvent>);

impl EventSink for BroadcastSink {
    fn emit(&self, event: SessionEvent) {
        let _ = self.0.send(event);
    }
}

fn to_sse_event(event: SessionEvent) -> Event {
    match event {
        SessionEvent::ProcessingStatus { is_processing, queue_depth } => Event::default()
            .event("processing_status")
            .json_data(serde_json::json!({ "isProcessing": is_processing, "queueDepth": queue_depth }))
            .unwrap_or_else(|_| Event::default().event("processing_status")),
        SessionEvent::SessionStarted { session_db_id, content_session_id } => Event::default()
            .event("session_started")
            .json_data(serde_json::json!({ "sessionDbId": session_db_id, "contentSessionId": content_session_id }))
            .unwrap_or_else(|_| Event::default().event("session_started")),
        SessionEvent::SessionCompleted { session_db_id, content_session_id } => Event::default()
            .event("session_completed")
            .json_data(serde_json::json!({ "sessionDbId": session_db_id, "contentSessionId": content_session_id }))
            .unwrap_or_else(|_| Event::default().event("session_completed")),
        SessionEvent::ObservationQueued { session_db_id, content_session_id } => Event::default()
            .event("observation_queued")
            .json_data(serde_json::json!({ "sessionDbId": session_db_id, "contentSessionId": content_session_id }))
            .unwrap_or_else(|_| Event::default().event("observation_queued")),
        SessionEvent::SummarizeQueued { session_db_id, content_session_id } => Event::default()
            .event("summarize_queued")
            .json_data(serde_json::json!({ "sessionDbId": session_db_id, "contentSessionId": content_session_id }))
            .unwrap_or_else(|_| Event::default().event("summarize_queued")),
        SessionEvent::NewObservation { session_db_id, observation } => Event::default()
            .event("new_observation")
            .json_data(serde_json::json!({ "sessionDbId": session_db_id, "observation": observation }))
            .unwrap_or_else(|_| Event::default().event("new_observation")),
        SessionEvent::NewPrompt { session_db_id, content_session_id, prompt_number } => Event::default()
            .event("new_prompt")
            .json_data(serde_json::json!({
                "sessionDbId": session_db_id,
                "contentSessionId": content_session_id,
                "promptNumber": prompt_number,
            }))
            .unwrap_or_else(|_| Event::default().event("new_prompt")),
    }
}

/// Adapts a broadcast receiver into an SSE byte-stream. A lagged receiver
/// surfaces one `lagged` event (count of missed messages) and keeps going
/// rather than terminating the connection.
fn event_stream(rx: broadcast::Receiver<SessionEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(to_sse_event(event)), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some((
                        Ok(Event::default()
                            .event("lagged")
                            .data(serde_json::json!({ "skipped": skipped }).to_string())),
                        rx,
                    ))
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

pub async fn stream_handler(
    State(state): State<GatewayState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events_tx.subscribe();
    Sse::new(event_stream(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn event_stream_yields_sent_events() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = Box::pin(event_stream(rx));

        tx.send(SessionEvent::SessionStarted {
            session_db_id: 1,
            content_session_id: "c1".to_string(),
        })
        .unwrap();

        let item = stream.next().await;
        assert!(item.is_some());
        assert!(item.unwrap().is_ok());
    }

    #[tokio::test]
    async fn event_stream_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel(8);
        drop(tx);
        let mut stream = Box::pin(event_stream(rx));
        assert!(stream.next().await.is_none());
    }
}
