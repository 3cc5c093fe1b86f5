// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming event subscription channel.
//!
//! Long-lived SSE response emitting each bus event as
//! `event: <kind>\ndata: <json>\n\n`. Subscribers that lag past the ring
//! capacity get a `lag` marker instead of the overwritten events; there is
//! no replay on reconnect — frontends re-read state via the session
//! snapshot endpoints.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};

use crate::event::{EventEnvelope, EventKind};
use crate::transport::state::Broker;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// One frame on a subscriber's cursor: an event, or proof of a gap.
#[derive(Debug)]
enum Frame {
    Envelope(EventEnvelope),
    Lagged(u64),
}

/// Per-subscriber view of the bus ring. Overwritten events collapse into a
/// single `Lagged` frame carrying the drop count.
fn subscriber_frames(rx: broadcast::Receiver<EventEnvelope>) -> impl Stream<Item = Frame> {
    BroadcastStream::new(rx).map(|result| match result {
        Ok(envelope) => Frame::Envelope(envelope),
        Err(BroadcastStreamRecvError::Lagged(dropped)) => Frame::Lagged(dropped),
    })
}

fn frame_to_event(frame: Frame) -> Event {
    match frame {
        Frame::Envelope(envelope) => {
            let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_owned());
            Event::default().event(envelope.kind.as_str()).data(data)
        }
        Frame::Lagged(dropped) => Event::default()
            .event(EventKind::Lag.as_str())
            .data(serde_json::json!({ "dropped": dropped }).to_string()),
    }
}

/// `GET /api/v1/events` — streaming subscription with a cursor at head.
pub async fn events(
    State(s): State<Arc<Broker>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let bus_events = subscriber_frames(s.bus.subscribe()).map(frame_to_event);
    let heartbeats = IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL))
        .map(|_| Event::default().event(EventKind::Heartbeat.as_str()).data("{}"));

    Sse::new(stream::select(bus_events, heartbeats).map(Ok))
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
