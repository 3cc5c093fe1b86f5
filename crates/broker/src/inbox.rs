// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbox item model: the unit of agent request flowing through a session.
//!
//! An item is created by the tool dispatcher on the caller's task, owned by
//! the inbox engine (which drives its status), and observed read-only by the
//! presenter and the event bus. The calling task blocks on the item's
//! rendezvous; the rendezvous fires exactly once and the waiter tells
//! resolution from cancellation by the delivered outcome.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// One selectable option inside a choice presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    #[serde(default)]
    pub summary: String,
    /// Silent options are skipped by the scroll readout.
    #[serde(default)]
    pub silent: bool,
}

/// How a speech request interacts with the audible channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechMode {
    /// Caller blocks until playback completes.
    Blocking,
    /// Caller returns at enqueue; playback is serialised by the TTS FIFO.
    Async,
    /// Preempts whatever is playing; caller returns at playback start.
    Urgent,
}

impl SpeechMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Async => "async",
            Self::Urgent => "urgent",
        }
    }
}

/// Payload of a single inbox item.
#[derive(Debug, Clone)]
pub enum ItemPayload {
    Choices { preamble: String, options: Vec<ChoiceOption>, multi: bool },
    Speech { text: String, mode: SpeechMode },
}

impl ItemPayload {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Choices { .. } => "choices",
            Self::Speech { .. } => "speech",
        }
    }
}

/// Item lifecycle. Advances monotonically
/// `queued → active → (resolved | cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Active,
    Resolved,
    Cancelled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Active => 1,
            Self::Resolved | Self::Cancelled => 2,
        }
    }
}

/// Why an item was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Transport,
    Operator,
    SessionClosed,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Operator => "operator",
            Self::SessionClosed => "session_closed",
        }
    }
}

/// What the rendezvous delivers back to the blocked caller.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Selection { labels: Vec<String>, summary: Option<String> },
    Spoken,
    Cancelled(CancelReason),
}

/// A single unit of agent request.
#[derive(Debug)]
pub struct InboxItem {
    pub id: String,
    /// Transport call id registered at enqueue, used for cancellation.
    pub call_id: Option<String>,
    pub payload: ItemPayload,
    pub created_at: Instant,
    status: parking_lot::Mutex<ItemStatus>,
    result: parking_lot::Mutex<Option<ItemOutcome>>,
    resolver: parking_lot::Mutex<Option<oneshot::Sender<ItemOutcome>>>,
}

impl InboxItem {
    /// Build a new queued item and the receiver half of its rendezvous.
    pub fn new(
        payload: ItemPayload,
        call_id: Option<String>,
    ) -> (Arc<Self>, oneshot::Receiver<ItemOutcome>) {
        let (tx, rx) = oneshot::channel();
        let item = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            call_id,
            payload,
            created_at: Instant::now(),
            status: parking_lot::Mutex::new(ItemStatus::Queued),
            result: parking_lot::Mutex::new(None),
            resolver: parking_lot::Mutex::new(Some(tx)),
        });
        (item, rx)
    }

    /// Build an item that is already resolved (urgent/async speech recorded
    /// straight into history). The rendezvous is pre-fired.
    pub fn resolved(payload: ItemPayload, outcome: ItemOutcome) -> Arc<Self> {
        let (item, _rx) = Self::new(payload, None);
        item.advance(ItemStatus::Resolved);
        *item.result.lock() = Some(outcome);
        item.resolver.lock().take();
        item
    }

    pub fn status(&self) -> ItemStatus {
        *self.status.lock()
    }

    /// Advance the status, rejecting regressions. Returns whether the
    /// transition was applied; a rejected transition is an engine invariant
    /// breach and is logged by the caller.
    pub(crate) fn advance(&self, next: ItemStatus) -> bool {
        let mut status = self.status.lock();
        if next.rank() < status.rank() || (status.rank() == 2 && next != *status) {
            return false;
        }
        *status = next;
        true
    }

    /// Fire the rendezvous with the final outcome. The sender is taken, so
    /// this delivers at most once; later calls are no-ops returning false.
    pub(crate) fn fire(&self, outcome: ItemOutcome) -> bool {
        let Some(tx) = self.resolver.lock().take() else {
            return false;
        };
        *self.result.lock() = Some(outcome.clone());
        let _ = tx.send(outcome);
        true
    }

    pub fn result(&self) -> Option<ItemOutcome> {
        self.result.lock().clone()
    }

    pub fn options(&self) -> Option<&[ChoiceOption]> {
        match &self.payload {
            ItemPayload::Choices { options, .. } => Some(options),
            ItemPayload::Speech { .. } => None,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self.payload, ItemPayload::Choices { multi: true, .. })
    }
}

#[cfg(test)]
#[path = "inbox_tests.rs"]
mod tests;
