// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbox engine: turns concurrent tool calls into a deterministic
//! per-session serial order with at-most-one-active semantics.
//!
//! Promotion is engine-driven: resolving the head promotes the next queued
//! item under the session's inbox lock, and the blocked caller only ever
//! waits on its own rendezvous. Event publication, rendezvous wakeups, and
//! TTS dispatch all happen after the lock is released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::error::ErrorCode;
use crate::event::EventKind;
use crate::inbox::{
    CancelReason, ChoiceOption, InboxItem, ItemOutcome, ItemPayload, ItemStatus, SpeechMode,
};
use crate::presenter::PresenterHandle;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::tts::TtsEngine;

/// What an accepted speech enqueue hands back to the dispatcher.
pub enum SpeechTicket {
    /// Blocking speech: wait for the rendezvous.
    Pending(oneshot::Receiver<ItemOutcome>),
    /// Async/urgent speech: already resolved for inbox purposes.
    Resolved,
}

#[derive(Clone)]
pub struct InboxEngine {
    registry: Arc<SessionRegistry>,
    bus: EventBus,
    tts: Arc<TtsEngine>,
    presenter: PresenterHandle,
}

impl InboxEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        bus: EventBus,
        tts: Arc<TtsEngine>,
        presenter: PresenterHandle,
    ) -> Self {
        Self { registry, bus, tts, presenter }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn tts(&self) -> &Arc<TtsEngine> {
        &self.tts
    }

    // -- Enqueue --------------------------------------------------------------

    /// Enqueue a choice presentation. The returned receiver fires once with
    /// the selection or a cancellation sentinel.
    pub fn enqueue_choices(
        &self,
        session: &Arc<Session>,
        preamble: String,
        options: Vec<ChoiceOption>,
        multi: bool,
        call_id: Option<String>,
    ) -> Result<oneshot::Receiver<ItemOutcome>, ErrorCode> {
        if options.is_empty() {
            return Err(ErrorCode::InvalidRequest);
        }
        session.touch();
        let (item, rx) = InboxItem::new(
            ItemPayload::Choices { preamble, options, multi },
            call_id,
        );
        if session.push_item(Arc::clone(&item)) {
            self.activate(session, &item);
        }
        Ok(rx)
    }

    /// Enqueue a speech request.
    ///
    /// Blocking speech takes the inbox FIFO like any other item. Async and
    /// urgent speech are resolved for inbox purposes at enqueue: they never
    /// occupy the inbox slot, so the at-most-one-active invariant holds even
    /// while an urgent line cuts ahead of everything audible.
    pub async fn enqueue_speech(
        &self,
        session: &Arc<Session>,
        text: String,
        mode: SpeechMode,
        call_id: Option<String>,
    ) -> Result<SpeechTicket, ErrorCode> {
        if text.trim().is_empty() {
            return Err(ErrorCode::InvalidRequest);
        }
        session.touch();
        self.bus.publish(
            Some(&session.id),
            EventKind::SpeechRequested,
            serde_json::json!({ "text": text, "mode": mode.as_str() }),
        );
        let req = self.tts.request_for(&session.voice(), text.clone());
        match mode {
            SpeechMode::Blocking => {
                let (item, rx) =
                    InboxItem::new(ItemPayload::Speech { text, mode }, call_id);
                if session.push_item(Arc::clone(&item)) {
                    self.activate(session, &item);
                }
                Ok(SpeechTicket::Pending(rx))
            }
            SpeechMode::Async => {
                session.record_resolved(InboxItem::resolved(
                    ItemPayload::Speech { text, mode },
                    ItemOutcome::Spoken,
                ));
                self.tts.speak_queued(Some(&session.id), req);
                Ok(SpeechTicket::Resolved)
            }
            SpeechMode::Urgent => {
                session.record_resolved(InboxItem::resolved(
                    ItemPayload::Speech { text, mode },
                    ItemOutcome::Spoken,
                ));
                // Resolves as soon as playback starts (or provably cannot).
                self.tts.speak_urgent(Some(&session.id), req).await;
                Ok(SpeechTicket::Resolved)
            }
        }
    }

    // -- Resolution -----------------------------------------------------------

    /// Resolve the session's active choices item with the operator's
    /// selection. Returns false when nothing was there to resolve (stale UI
    /// input is discarded silently).
    pub fn resolve_active(
        &self,
        session: &Arc<Session>,
        labels: Vec<String>,
        summary: Option<String>,
    ) -> bool {
        let Some(item) = session.active_item() else {
            return false;
        };
        if item.options().is_none() {
            // Speech items resolve via playback, not operator input.
            return false;
        }
        let Some(report) = session.finish_head(&item.id, ItemStatus::Resolved) else {
            return false;
        };
        report.finished.fire(ItemOutcome::Selection {
            labels: labels.clone(),
            summary: summary.clone(),
        });
        self.bus.publish(
            Some(&session.id),
            EventKind::SelectionMade,
            serde_json::json!({
                "item_id": report.finished.id,
                "selected": labels,
                "summary": summary,
            }),
        );
        self.after_head_change(session, report.promoted);
        true
    }

    /// Cancel the active item (operator dismiss).
    pub fn cancel_active(&self, session: &Arc<Session>, reason: CancelReason) -> bool {
        let Some(item) = session.active_item() else {
            return false;
        };
        self.cancel_item(session, &item, reason)
    }

    /// Cancel a call by its transport call id, wherever it sits in the
    /// inbox. A cancel delivered before the item activates prevents it from
    /// ever activating.
    pub fn cancel_call(&self, session: &Arc<Session>, call_id: &str, reason: CancelReason) -> bool {
        let Some(item) = session.find_by_call(call_id) else {
            return false;
        };
        match item.status() {
            ItemStatus::Queued => match session.remove_queued(&item.id) {
                Some(removed) => {
                    removed.fire(ItemOutcome::Cancelled(reason));
                    true
                }
                None => false,
            },
            ItemStatus::Active => self.cancel_item(session, &item, reason),
            ItemStatus::Resolved | ItemStatus::Cancelled => false,
        }
    }

    fn cancel_item(
        &self,
        session: &Arc<Session>,
        item: &Arc<InboxItem>,
        reason: CancelReason,
    ) -> bool {
        let Some(report) = session.finish_head(&item.id, ItemStatus::Cancelled) else {
            return false;
        };
        report.finished.fire(ItemOutcome::Cancelled(reason));
        self.after_head_change(session, report.promoted);
        true
    }

    // -- Session removal / pruning --------------------------------------------

    /// Remove a session: every queued or active item is cancelled with the
    /// reason, rendezvous fire, and `session_removed` is published.
    pub fn close_session(&self, id: &str, reason: CancelReason) -> bool {
        let Some(session) = self.registry.take(id) else {
            return false;
        };
        let cancelled = session.cancel_all();
        for item in &cancelled {
            item.fire(ItemOutcome::Cancelled(reason));
        }
        if !cancelled.is_empty() {
            debug!("session {id}: cancelled {} items on close", cancelled.len());
        }
        self.bus.publish(
            Some(id),
            EventKind::SessionRemoved,
            serde_json::json!({ "reason": reason.as_str() }),
        );
        self.presenter.session_removed(id);
        true
    }

    /// Periodic maintenance: sweep lifecycle state and remove prunable
    /// sessions. Sessions holding items are never pruned.
    pub fn prune_stale(&self, now: Instant, stale_after: Duration) -> usize {
        let mut removed = 0;
        for session in self.registry.prune_candidates(now, stale_after) {
            if session.has_items() {
                continue;
            }
            if self.close_session(&session.id, CancelReason::SessionClosed) {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("pruned {removed} stale sessions");
        }
        removed
    }

    // -- Activation -----------------------------------------------------------

    /// Bring a freshly-promoted head item to life. For choices this informs
    /// the presenter and narrates the preamble; for blocking speech it
    /// dispatches playback and resolves the item when the player exits.
    fn activate(&self, session: &Arc<Session>, item: &Arc<InboxItem>) {
        match &item.payload {
            ItemPayload::Choices { preamble, options, multi } => {
                self.bus.publish(
                    Some(&session.id),
                    EventKind::ChoicesPresented,
                    serde_json::json!({
                        "item_id": item.id,
                        "preamble": preamble,
                        "options": options,
                        "multi": multi,
                    }),
                );
                self.presenter.active_changed(&session.id);
                if !preamble.trim().is_empty() {
                    let req = self.tts.request_for(&session.voice(), preamble.clone());
                    self.tts.speak_queued(Some(&session.id), req);
                }
            }
            ItemPayload::Speech { text, mode } => {
                if *mode != SpeechMode::Blocking {
                    warn!("non-blocking speech item reached the inbox head");
                }
                self.presenter.active_changed(&session.id);
                let engine = self.clone();
                let session = Arc::clone(session);
                let item = Arc::clone(item);
                let req = self.tts.request_for(&session.voice(), text.clone());
                tokio::spawn(async move {
                    // Playback outcome does not gate the agent: audio
                    // failures surface as events, the call still resolves.
                    let _ = engine.tts.speak_blocking(Some(&session.id), req).await;
                    engine.finish_speech(&session, &item);
                });
            }
        }
    }

    fn finish_speech(&self, session: &Arc<Session>, item: &Arc<InboxItem>) {
        let Some(report) = session.finish_head(&item.id, ItemStatus::Resolved) else {
            // Cancelled underneath the playback; nothing left to resolve.
            return;
        };
        report.finished.fire(ItemOutcome::Spoken);
        self.after_head_change(session, report.promoted);
    }

    fn after_head_change(&self, session: &Arc<Session>, promoted: Option<Arc<InboxItem>>) {
        match promoted {
            Some(next) => self.activate(session, &next),
            None => self.presenter.active_changed(&session.id),
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
