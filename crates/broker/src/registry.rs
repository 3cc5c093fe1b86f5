// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide session registry: id → session map plus focus arbitration.
//!
//! The registry lock guards only the map and focus slot. Cancelling items,
//! publishing events, and waking blocked callers happen in the inbox engine
//! after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal;
use nix::unistd::Pid;

use crate::bus::EventBus;
use crate::event::EventKind;
use crate::session::{Lifecycle, Session, SessionHints};

/// Checks whether a process with the given PID is alive (signal 0 probe).
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    signal::kill(Pid::from_raw(pid_i32), None).is_ok()
}

pub struct SessionRegistry {
    sessions: parking_lot::RwLock<HashMap<String, Arc<Session>>>,
    focused: parking_lot::Mutex<Option<String>>,
    bus: EventBus,
}

impl SessionRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            sessions: parking_lot::RwLock::new(HashMap::new()),
            focused: parking_lot::Mutex::new(None),
            bus,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Look up or create a session. Idempotent: N calls with the same id
    /// return the same session. Emits `session_created` on first create,
    /// after the map lock is released.
    pub fn get_or_create(&self, id: &str, hints: SessionHints) -> Arc<Session> {
        let (session, created) = {
            let mut sessions = self.sessions.write();
            match sessions.get(id) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let session = Arc::new(Session::new(id));
                    sessions.insert(id.to_owned(), Arc::clone(&session));
                    (session, true)
                }
            }
        };
        session.merge_hints(hints);
        session.touch();
        if created {
            self.bus.publish(
                Some(id),
                EventKind::SessionCreated,
                serde_json::json!({ "name": session.name() }),
            );
        }
        session
    }

    /// Remove a session from the map, clearing focus if it was focused.
    /// Returns the removed session so the engine can cancel its items and
    /// publish `session_removed` outside the lock.
    pub fn take(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            let mut focused = self.focused.lock();
            if focused.as_deref() == Some(id) {
                *focused = None;
            }
        }
        removed
    }

    // -- Focus ---------------------------------------------------------------

    pub fn focus(&self, id: &str) -> bool {
        if self.sessions.read().contains_key(id) {
            *self.focused.lock() = Some(id.to_owned());
            true
        } else {
            false
        }
    }

    pub fn focused(&self) -> Option<Arc<Session>> {
        let id = self.focused.lock().clone()?;
        self.get(&id)
    }

    pub fn focused_id(&self) -> Option<String> {
        self.focused.lock().clone()
    }

    /// Next session after the focused one (in id order, wrapping) that has
    /// inbox items awaiting the operator. Falls back to any session with
    /// items, including the focused one.
    pub fn next_with_pending(&self) -> Option<Arc<Session>> {
        let sessions = self.sessions.read();
        let mut ids: Vec<&String> = sessions.keys().collect();
        ids.sort();
        let focused = self.focused.lock().clone();
        let start = match focused {
            Some(ref f) => ids.iter().position(|id| *id == f).map(|p| p + 1).unwrap_or(0),
            None => 0,
        };
        let n = ids.len();
        for offset in 0..n {
            let id = ids[(start + offset) % n];
            if let Some(session) = sessions.get(id) {
                if session.has_items() {
                    return Some(Arc::clone(session));
                }
            }
        }
        None
    }

    // -- Iteration -----------------------------------------------------------

    /// All sessions in id order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read();
        let mut all: Vec<_> = sessions.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    // -- Pruning -------------------------------------------------------------

    /// Sweep lifecycle state and collect sessions eligible for removal.
    ///
    /// A session becomes `stale` after `stale_after` without activity and
    /// `dead` when its registered process is gone. Only sessions with an
    /// empty inbox that are not focused are ever returned; items block
    /// pruning even when the session is stale.
    pub fn prune_candidates(&self, now: Instant, stale_after: Duration) -> Vec<Arc<Session>> {
        let focused = self.focused.lock().clone();
        let sessions = self.list();
        let mut removable = Vec::new();
        for session in sessions {
            if session.lifecycle() == Lifecycle::Live && session.idle_for(now) >= stale_after {
                session.set_lifecycle(Lifecycle::Stale);
            }
            if let Some(pid) = session.hints().pid {
                if session.lifecycle() != Lifecycle::Dead && !is_process_alive(pid) {
                    session.set_lifecycle(Lifecycle::Dead);
                }
            }
            let gone = matches!(session.lifecycle(), Lifecycle::Stale | Lifecycle::Dead);
            if gone && !session.has_items() && focused.as_deref() != Some(session.id.as_str()) {
                removable.push(session);
            }
        }
        removable
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
