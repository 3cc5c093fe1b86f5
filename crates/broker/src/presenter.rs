// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presenter: the single task that owns operator-facing interaction state.
//!
//! All focus, scroll, and multi-select mutations happen on this one task;
//! everything else talks to it through [`PresenterHandle`]. Frontend key
//! posts are injected into the same command stream as local input, so a
//! `POST /key` behaves exactly as if the operator typed it. Long work
//! (subprocess spawn, playback) is never done here — readouts are handed to
//! the TTS engine, resolutions fire one-shot channels.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::InboxEngine;
use crate::inbox::{CancelReason, InboxItem};
use crate::session::Session;

/// Keys the presenter understands, as delivered by the operator's terminal
/// or a frontend `POST /key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    Up,
    Down,
    Enter,
    Space,
    Escape,
    /// Cycle focus to the next session awaiting the operator.
    Tab,
}

impl KeyPress {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "k" | "up" => Some(Self::Up),
            "j" | "down" => Some(Self::Down),
            "enter" | "return" => Some(Self::Enter),
            "space" | " " => Some(Self::Space),
            "esc" | "escape" => Some(Self::Escape),
            "tab" => Some(Self::Tab),
            _ => None,
        }
    }
}

/// Commands consumed by the presenter task.
#[derive(Debug)]
pub enum PresenterCommand {
    /// A new item became active (or the inbox emptied) on this session.
    ActiveChanged { session_id: String },
    SessionRemoved { session_id: String },
    Key { session_id: Option<String>, key: KeyPress },
    /// Frontend selection by label.
    Select { session_id: String, label: String, summary: Option<String> },
    /// Move the highlight to an index, with readout.
    Highlight { session_id: String, index: usize },
    /// Operator typed a reply instead of picking an option.
    Freeform { session_id: String, text: String },
    QueueMessage { session_id: Option<String>, text: String },
}

/// Cheap-clone sender half used by the engine and the HTTP layer.
#[derive(Clone)]
pub struct PresenterHandle {
    tx: mpsc::Sender<PresenterCommand>,
}

impl PresenterHandle {
    pub fn channel() -> (Self, mpsc::Receiver<PresenterCommand>) {
        let (tx, rx) = mpsc::channel(256);
        (Self { tx }, rx)
    }

    /// Fire-and-forget send. The presenter must never be able to block its
    /// callers; under overload commands are dropped with a warning.
    pub fn send(&self, command: PresenterCommand) {
        if self.tx.try_send(command).is_err() {
            warn!("presenter queue full, dropping command");
        }
    }

    pub fn active_changed(&self, session_id: &str) {
        self.send(PresenterCommand::ActiveChanged { session_id: session_id.to_owned() });
    }

    pub fn session_removed(&self, session_id: &str) {
        self.send(PresenterCommand::SessionRemoved { session_id: session_id.to_owned() });
    }
}

/// Run the presenter loop until shutdown. Owns all presenter state.
pub async fn run(
    engine: InboxEngine,
    mut rx: mpsc::Receiver<PresenterCommand>,
    shutdown: CancellationToken,
) {
    let mut presenter = Presenter { engine, toggles: HashMap::new() };
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        presenter.handle(command);
    }
}

struct Presenter {
    engine: InboxEngine,
    /// Multi-select toggle state per session, keyed by option index.
    toggles: HashMap<String, BTreeSet<usize>>,
}

impl Presenter {
    fn handle(&mut self, command: PresenterCommand) {
        match command {
            PresenterCommand::ActiveChanged { session_id } => self.on_active_changed(&session_id),
            PresenterCommand::SessionRemoved { session_id } => {
                self.toggles.remove(&session_id);
                // Removal already cleared a matching focus in the registry.
                if self.engine.registry().focused_id().is_none() {
                    self.focus_next();
                }
            }
            PresenterCommand::Key { session_id, key } => self.on_key(session_id.as_deref(), key),
            PresenterCommand::Select { session_id, label, summary } => {
                self.on_select(&session_id, &label, summary)
            }
            PresenterCommand::Highlight { session_id, index } => {
                if let Some(session) = self.engine.registry().get(&session_id) {
                    self.set_highlight(&session, index);
                }
            }
            PresenterCommand::Freeform { session_id, text } => {
                if let Some(session) = self.engine.registry().get(&session_id) {
                    self.toggles.remove(&session_id);
                    self.engine.resolve_active(
                        &session,
                        vec![text],
                        Some("(freeform input)".to_owned()),
                    );
                }
            }
            PresenterCommand::QueueMessage { session_id, text } => {
                let session = match session_id {
                    Some(id) => self.engine.registry().get(&id),
                    None => self.engine.registry().focused(),
                };
                match session {
                    Some(session) => session.queue_message(text),
                    None => debug!("queue-message with no target session"),
                }
            }
        }
    }

    fn on_active_changed(&mut self, session_id: &str) {
        let registry = self.engine.registry();
        let Some(session) = registry.get(session_id) else {
            return;
        };
        // New item: highlight starts at the top, toggles reset.
        session.scroll_index.store(0, Ordering::Relaxed);
        self.toggles.remove(session_id);
        // Unfocused sessions keep processing; an idle presenter adopts the
        // first session that needs attention.
        if registry.focused_id().is_none() && session.has_items() {
            registry.focus(session_id);
        }
    }

    fn on_key(&mut self, session_id: Option<&str>, key: KeyPress) {
        if key == KeyPress::Tab {
            self.focus_next();
            return;
        }
        let session = match session_id {
            Some(id) => self.engine.registry().get(id),
            None => self.engine.registry().focused(),
        };
        let Some(session) = session else {
            return;
        };
        let Some(item) = session.active_item() else {
            return;
        };
        let Some(options) = item.options() else {
            return;
        };
        let current = session.scroll_index.load(Ordering::Relaxed);
        match key {
            KeyPress::Down => {
                let next = (current + 1).min(options.len().saturating_sub(1));
                self.set_highlight(&session, next);
            }
            KeyPress::Up => {
                self.set_highlight(&session, current.saturating_sub(1));
            }
            KeyPress::Space => {
                if item.is_multi() {
                    let set = self.toggles.entry(session.id.clone()).or_default();
                    if !set.remove(&current) {
                        set.insert(current);
                    }
                }
            }
            KeyPress::Enter => self.select_highlighted(&session, &item, current),
            KeyPress::Escape => {
                self.toggles.remove(&session.id);
                self.engine.cancel_active(&session, CancelReason::Operator);
                self.advance_focus_if_idle(&session);
            }
            KeyPress::Tab => {}
        }
    }

    /// Move the highlight and speak the newly-highlighted label, unless the
    /// option asked for silence.
    fn set_highlight(&self, session: &Arc<Session>, index: usize) {
        let Some(item) = session.active_item() else {
            return;
        };
        let Some(options) = item.options() else {
            return;
        };
        let index = index.min(options.len().saturating_sub(1));
        session.scroll_index.store(index, Ordering::Relaxed);

        let Some(option) = options.get(index) else {
            return;
        };
        // Every scroll supersedes in-flight readouts, spoken or not.
        let token = self.engine.tts().next_scroll_token();
        if !option.silent {
            let req = self.engine.tts().request_for(&session.voice(), option.label.clone());
            self.engine.tts().scroll_readout(req, token);
        }
    }

    fn select_highlighted(&mut self, session: &Arc<Session>, item: &Arc<InboxItem>, current: usize) {
        let Some(options) = item.options() else {
            return;
        };
        let (labels, summary) = if item.is_multi() {
            let set = self.toggles.remove(&session.id).unwrap_or_default();
            let picked: Vec<usize> =
                if set.is_empty() { vec![current] } else { set.into_iter().collect() };
            let labels: Vec<String> = picked
                .into_iter()
                .filter_map(|i| options.get(i))
                .map(|o| o.label.clone())
                .collect();
            (labels, None)
        } else {
            match options.get(current) {
                Some(option) => (vec![option.label.clone()], some_nonempty(&option.summary)),
                None => return,
            }
        };
        self.engine.resolve_active(session, labels, summary);
        self.advance_focus_if_idle(session);
    }

    /// Frontend selection by label rather than index.
    fn on_select(&mut self, session_id: &str, label: &str, summary: Option<String>) {
        let Some(session) = self.engine.registry().get(session_id) else {
            return;
        };
        let Some(item) = session.active_item() else {
            return;
        };
        let Some(options) = item.options() else {
            return;
        };
        let summary = summary.or_else(|| {
            options.iter().find(|o| o.label == label).and_then(|o| some_nonempty(&o.summary))
        });
        self.toggles.remove(session_id);
        self.engine.resolve_active(&session, vec![label.to_owned()], summary);
        self.advance_focus_if_idle(&session);
    }

    /// After the focused session runs out of items, move to the next
    /// session awaiting the operator.
    fn advance_focus_if_idle(&self, session: &Arc<Session>) {
        let registry = self.engine.registry();
        if registry.focused_id().as_deref() != Some(session.id.as_str()) {
            return;
        }
        if session.has_items() {
            return;
        }
        self.focus_next();
    }

    fn focus_next(&self) {
        let registry = self.engine.registry();
        match registry.next_with_pending() {
            Some(next) => {
                registry.focus(&next.id);
            }
            None => debug!("presenter idle: no session with pending items"),
        }
    }
}

fn some_nonempty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

#[cfg(test)]
#[path = "presenter_tests.rs"]
mod tests;
