// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus — fans lifecycle events out to frontend subscribers.
//!
//! Publication is an append onto a bounded broadcast ring; each subscriber
//! owns a cursor. A subscriber that lags past the ring capacity loses the
//! overwritten events and observes a `Lagged` error, which the stream layer
//! turns into a `lag` marker event. Delivery is best-effort by design.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::{EventEnvelope, EventKind};

/// Ring capacity per subscriber before old events are overwritten.
const BUS_CAPACITY: usize = 256;

/// Broker-wide event bus. Cheap to clone; all clones publish onto the same
/// ring and share the sequence counter.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx, seq: Arc::new(AtomicU64::new(0)) }
    }

    /// Publish an event, assigning the next sequence number.
    ///
    /// Returns the assigned sequence number. Send errors (no subscribers)
    /// are ignored; the sequence still advances so gaps are observable.
    pub fn publish(
        &self,
        session_id: Option<&str>,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            session_id: session_id.map(str::to_owned),
            kind,
            payload,
            seq,
        };
        let _ = self.tx.send(envelope);
        seq
    }

    /// Subscribe with a cursor at the current head. No replay of prior
    /// events; reconnecting frontends re-read full state via the snapshot
    /// endpoints instead.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Sequence number the next published event will receive.
    pub fn next_seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
