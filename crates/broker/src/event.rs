// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format lifecycle events published by the broker.
//!
//! Every state change is fanned out to frontend subscribers as an
//! [`EventEnvelope`]. The `session_id` field is absent on broker-wide events
//! (heartbeats, audio pulses); `seq` is assigned by the bus and is totally
//! ordered across all kinds.

use serde::{Deserialize, Serialize};

/// Event kinds carried on the bus and the `/api/v1/events` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ChoicesPresented,
    SpeechRequested,
    SelectionMade,
    RecordingState,
    SessionCreated,
    SessionRemoved,
    Lag,
    Heartbeat,
    PulseDown,
    PulseRecovered,
    SpeechFailed,
}

impl EventKind {
    /// Wire-format string for this kind (the SSE `event:` field).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChoicesPresented => "choices_presented",
            Self::SpeechRequested => "speech_requested",
            Self::SelectionMade => "selection_made",
            Self::RecordingState => "recording_state",
            Self::SessionCreated => "session_created",
            Self::SessionRemoved => "session_removed",
            Self::Lag => "lag",
            Self::Heartbeat => "heartbeat",
            Self::PulseDown => "pulse_down",
            Self::PulseRecovered => "pulse_recovered",
            Self::SpeechFailed => "speech_failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub seq: u64,
}
