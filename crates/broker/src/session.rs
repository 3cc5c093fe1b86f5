// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent session state: the inbox FIFO, resolved history, operator
//! message queue, and lifecycle bookkeeping.
//!
//! Lock discipline: every lock here is held only to mutate the guarded data;
//! event publication and rendezvous wakeups happen in the engine, outside
//! any session lock. The registry lock is always taken before a session lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::inbox::{InboxItem, ItemStatus};

/// Resolved items kept per session, most recent first.
pub const HISTORY_CAP: usize = 200;

/// Session lifecycle as observed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Live,
    Stale,
    Dead,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Stale => "stale",
            Self::Dead => "dead",
        }
    }
}

/// Registration-time metadata. Hints populate session metadata but never
/// change identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_pane: Option<String>,
    /// Agent process id; when present, the pruner probes it to detect dead
    /// sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Per-session TTS overrides. Unset fields fall back to broker defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

struct Inbox {
    items: VecDeque<Arc<InboxItem>>,
    history: VecDeque<Arc<InboxItem>>,
}

/// Result of finishing the head item: the finished item plus the next item
/// promoted to active, if any.
pub struct FinishReport {
    pub finished: Arc<InboxItem>,
    pub promoted: Option<Arc<InboxItem>>,
}

/// One connected agent.
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    name: parking_lot::RwLock<String>,
    voice: parking_lot::RwLock<VoiceProfile>,
    hints: parking_lot::RwLock<SessionHints>,
    inbox: parking_lot::Mutex<Inbox>,
    pending: parking_lot::Mutex<Vec<String>>,
    last_activity: parking_lot::Mutex<Instant>,
    lifecycle: parking_lot::Mutex<Lifecycle>,
    /// Operator's highlighted option within the active item.
    pub scroll_index: AtomicUsize,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Instant::now(),
            name: parking_lot::RwLock::new("Agent".to_owned()),
            voice: parking_lot::RwLock::new(VoiceProfile::default()),
            hints: parking_lot::RwLock::new(SessionHints::default()),
            inbox: parking_lot::Mutex::new(Inbox {
                items: VecDeque::new(),
                history: VecDeque::new(),
            }),
            pending: parking_lot::Mutex::new(Vec::new()),
            last_activity: parking_lot::Mutex::new(Instant::now()),
            lifecycle: parking_lot::Mutex::new(Lifecycle::Live),
            scroll_index: AtomicUsize::new(0),
        }
    }

    // -- Metadata -------------------------------------------------------------

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    pub fn voice(&self) -> VoiceProfile {
        self.voice.read().clone()
    }

    pub fn set_voice(&self, profile: VoiceProfile) {
        *self.voice.write() = profile;
    }

    pub fn hints(&self) -> SessionHints {
        self.hints.read().clone()
    }

    /// Merge registration hints; unset incoming fields keep prior values.
    pub fn merge_hints(&self, incoming: SessionHints) {
        let mut hints = self.hints.write();
        hints.cwd = incoming.cwd.or(hints.cwd.take());
        hints.hostname = incoming.hostname.or(hints.hostname.take());
        hints.tmux_session = incoming.tmux_session.or(hints.tmux_session.take());
        hints.tmux_pane = incoming.tmux_pane.or(hints.tmux_pane.take());
        hints.pid = incoming.pid.or(hints.pid.take());
    }

    // -- Activity / lifecycle -------------------------------------------------

    /// Record agent activity: refresh the timestamp and revive a stale
    /// session.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Stale {
            *lifecycle = Lifecycle::Live;
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn set_lifecycle(&self, state: Lifecycle) {
        *self.lifecycle.lock() = state;
    }

    // -- Operator messages ----------------------------------------------------

    pub fn queue_message(&self, text: impl Into<String>) {
        self.pending.lock().push(text.into());
    }

    /// Drain operator-queued messages for attachment to a tool response.
    pub fn drain_pending(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // -- Inbox ----------------------------------------------------------------

    /// Append an item. If it lands at the head it is promoted to active
    /// under the same lock, so "head iff active" never has a gap. Returns
    /// whether the item became the head.
    pub fn push_item(&self, item: Arc<InboxItem>) -> bool {
        let mut inbox = self.inbox.lock();
        let is_head = inbox.items.is_empty();
        if is_head {
            item.advance(ItemStatus::Active);
        }
        inbox.items.push_back(item);
        is_head
    }

    /// The head item, if it is currently active.
    pub fn active_item(&self) -> Option<Arc<InboxItem>> {
        let inbox = self.inbox.lock();
        inbox
            .items
            .front()
            .filter(|item| item.status() == ItemStatus::Active)
            .cloned()
    }

    /// Finish the head item with a terminal status, move it to history, and
    /// promote the next item to active. Returns `None` when the head does
    /// not match `item_id` (already finished by a racing path).
    pub fn finish_head(&self, item_id: &str, status: ItemStatus) -> Option<FinishReport> {
        let mut inbox = self.inbox.lock();
        if inbox.items.front().map(|i| i.id.as_str()) != Some(item_id) {
            return None;
        }
        let finished = inbox.items.pop_front()?;
        if !finished.advance(status) {
            tracing::error!(
                session = %self.id,
                item = %finished.id,
                "head item refused terminal status {status:?}"
            );
        }
        push_history(&mut inbox.history, Arc::clone(&finished));

        let promoted = inbox.items.front().cloned();
        if let Some(ref next) = promoted {
            next.advance(ItemStatus::Active);
        }
        Some(FinishReport { finished, promoted })
    }

    /// Cancel a queued (non-head) item in place and move it to history.
    pub fn remove_queued(&self, item_id: &str) -> Option<Arc<InboxItem>> {
        let mut inbox = self.inbox.lock();
        let pos = inbox
            .items
            .iter()
            .position(|i| i.id == item_id && i.status() == ItemStatus::Queued)?;
        let item = inbox.items.remove(pos)?;
        item.advance(ItemStatus::Cancelled);
        push_history(&mut inbox.history, Arc::clone(&item));
        Some(item)
    }

    /// Locate an item by transport call id anywhere in the inbox.
    pub fn find_by_call(&self, call_id: &str) -> Option<Arc<InboxItem>> {
        let inbox = self.inbox.lock();
        inbox
            .items
            .iter()
            .find(|i| i.call_id.as_deref() == Some(call_id))
            .cloned()
    }

    /// Cancel everything still in the inbox (session removal). Items are
    /// marked and moved to history; the caller fires their rendezvous.
    pub fn cancel_all(&self) -> Vec<Arc<InboxItem>> {
        let mut inbox = self.inbox.lock();
        let items: Vec<_> = inbox.items.drain(..).collect();
        for item in &items {
            item.advance(ItemStatus::Cancelled);
            push_history(&mut inbox.history, Arc::clone(item));
        }
        items
    }

    /// Record an already-resolved item (urgent/async speech) in history.
    pub fn record_resolved(&self, item: Arc<InboxItem>) {
        push_history(&mut self.inbox.lock().history, item);
    }

    pub fn inbox_depth(&self) -> usize {
        self.inbox.lock().items.len()
    }

    pub fn has_items(&self) -> bool {
        !self.inbox.lock().items.is_empty()
    }

    /// Most recent history entries, newest first.
    pub fn history_tail(&self, n: usize) -> Vec<Arc<InboxItem>> {
        self.inbox.lock().history.iter().take(n).cloned().collect()
    }

    // -- Snapshots ------------------------------------------------------------

    pub fn snapshot(&self, focused: bool) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            name: self.name(),
            lifecycle: self.lifecycle(),
            inbox_depth: self.inbox_depth(),
            has_active_item: self.active_item().is_some(),
            pending_messages: self.pending_count(),
            scroll_index: self.scroll_index.load(Ordering::Relaxed),
            focused,
        }
    }
}

fn push_history(history: &mut VecDeque<Arc<InboxItem>>, item: Arc<InboxItem>) {
    history.push_front(item);
    history.truncate(HISTORY_CAP);
}

/// Operator-facing summary of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub name: String,
    pub lifecycle: Lifecycle,
    pub inbox_depth: usize,
    pub has_active_item: bool,
    pub pending_messages: usize,
    pub scroll_index: usize,
    pub focused: bool,
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
