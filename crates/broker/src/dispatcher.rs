// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool dispatcher: glue between the agent RPC transport and the inbox
//! engine.
//!
//! The transport layer is a thin wire adapter; every tool here takes parsed
//! JSON arguments and returns a JSON result. Each successful result carries
//! the operator messages drained at return time, so the agent always sees
//! queued notes on its next response.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::{InboxEngine, SpeechTicket};
use crate::error::{error_message, ErrorCode};
use crate::inbox::{CancelReason, ChoiceOption, ItemOutcome, SpeechMode};
use crate::session::{Session, SessionHints};

/// A tool failure: machine-readable code plus a message carrying detail
/// (for cancellations, the reason tag).
#[derive(Debug, Clone)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<ErrorCode> for ToolError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code, error_message(code))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RegisterArgs {
    #[serde(flatten)]
    hints: SessionHints,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    style: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoicesArgs {
    #[serde(default)]
    preamble: String,
    #[serde(default)]
    choices: Vec<ChoiceOption>,
}

#[derive(Debug, Clone, Deserialize)]
struct SpeakArgs {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RenameArgs {
    name: String,
}

#[derive(Clone)]
pub struct ToolDispatcher {
    engine: InboxEngine,
}

impl ToolDispatcher {
    pub fn new(engine: InboxEngine) -> Self {
        Self { engine }
    }

    /// Dispatch a named tool. `session_key` is the transport-provided
    /// session identity; `call_id` is registered at enqueue so the
    /// transport can cancel the call later.
    pub async fn dispatch(
        &self,
        tool: &str,
        session_key: Option<&str>,
        call_id: Option<String>,
        args: Value,
    ) -> Result<Value, ToolError> {
        if tool == "register_session" {
            return self.register_session(session_key, args);
        }

        let session = session_key
            .and_then(|key| self.engine.registry().get(key))
            .ok_or_else(|| ToolError::new(ErrorCode::InvalidRequest, "unknown session"))?;

        match tool {
            "present_choices" => self.present_choices(&session, call_id, args, false).await,
            "present_multi_select" => self.present_choices(&session, call_id, args, true).await,
            "speak" => self.speak(&session, call_id, args, SpeechMode::Blocking).await,
            "speak_async" => self.speak(&session, call_id, args, SpeechMode::Async).await,
            "speak_urgent" => self.speak(&session, call_id, args, SpeechMode::Urgent).await,
            "rename_session" => self.rename_session(&session, args),
            "check_inbox" => {
                session.touch();
                Ok(json!({ "pending_messages": session.drain_pending() }))
            }
            _ => Err(ToolError::new(ErrorCode::InvalidRequest, format!("unknown tool: {tool}"))),
        }
    }

    /// Transport-level cancellation of an in-flight call.
    pub fn cancel(&self, session_id: &str, call_id: &str) -> Result<Value, ToolError> {
        let session = self
            .engine
            .registry()
            .get(session_id)
            .ok_or_else(|| ToolError::new(ErrorCode::InvalidRequest, "unknown session"))?;
        let cancelled = self.engine.cancel_call(&session, call_id, CancelReason::Transport);
        Ok(json!({ "cancelled": cancelled }))
    }

    // -- Tools ----------------------------------------------------------------

    fn register_session(&self, session_key: Option<&str>, args: Value) -> Result<Value, ToolError> {
        let args: RegisterArgs = parse(args)?;
        let id = match session_key {
            Some(key) if !key.is_empty() => key.to_owned(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let session = self.engine.registry().get_or_create(&id, args.hints);
        if let Some(name) = args.name {
            if !name.is_empty() {
                session.set_name(name);
            }
        }
        if args.voice.is_some() || args.style.is_some() {
            let mut profile = session.voice();
            if args.voice.is_some() {
                profile.voice = args.voice;
            }
            if args.style.is_some() {
                profile.style = args.style;
            }
            session.set_voice(profile);
        }
        Ok(json!({ "session_id": id, "pending_messages": session.drain_pending() }))
    }

    async fn present_choices(
        &self,
        session: &Arc<Session>,
        call_id: Option<String>,
        args: Value,
        multi: bool,
    ) -> Result<Value, ToolError> {
        let args: ChoicesArgs = parse(args)?;
        if args.choices.is_empty() {
            return Err(ToolError::new(ErrorCode::InvalidRequest, "choices must not be empty"));
        }
        let rx = self
            .engine
            .enqueue_choices(session, args.preamble, args.choices, multi, call_id)
            .map_err(ToolError::from)?;

        // Block the tool-call task on the rendezvous.
        let outcome = rx
            .await
            .map_err(|_| ToolError::new(ErrorCode::Internal, "rendezvous dropped"))?;
        match outcome {
            ItemOutcome::Selection { labels, summary } => {
                let selected: Value = if multi {
                    json!(labels)
                } else {
                    json!(labels.first().cloned().unwrap_or_default())
                };
                Ok(json!({
                    "selected": selected,
                    "summary": summary,
                    "pending_messages": session.drain_pending(),
                }))
            }
            ItemOutcome::Cancelled(reason) => {
                Err(ToolError::new(ErrorCode::Cancelled, reason.as_str()))
            }
            ItemOutcome::Spoken => Err(ErrorCode::Internal.into()),
        }
    }

    async fn speak(
        &self,
        session: &Arc<Session>,
        call_id: Option<String>,
        args: Value,
        mode: SpeechMode,
    ) -> Result<Value, ToolError> {
        let args: SpeakArgs = parse(args)?;
        let ticket = self
            .engine
            .enqueue_speech(session, args.text, mode, call_id)
            .await
            .map_err(ToolError::from)?;
        match ticket {
            SpeechTicket::Pending(rx) => {
                let outcome = rx
                    .await
                    .map_err(|_| ToolError::new(ErrorCode::Internal, "rendezvous dropped"))?;
                match outcome {
                    ItemOutcome::Spoken => {}
                    ItemOutcome::Cancelled(reason) => {
                        return Err(ToolError::new(ErrorCode::Cancelled, reason.as_str()));
                    }
                    ItemOutcome::Selection { .. } => return Err(ErrorCode::Internal.into()),
                }
            }
            SpeechTicket::Resolved => {}
        }
        Ok(json!({ "ok": true, "pending_messages": session.drain_pending() }))
    }

    fn rename_session(&self, session: &Arc<Session>, args: Value) -> Result<Value, ToolError> {
        let args: RenameArgs = parse(args)?;
        if args.name.trim().is_empty() {
            return Err(ToolError::new(ErrorCode::InvalidRequest, "name must not be empty"));
        }
        session.touch();
        session.set_name(args.name);
        Ok(json!({ "ok": true, "pending_messages": session.drain_pending() }))
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args)
        .map_err(|e| ToolError::new(ErrorCode::InvalidRequest, format!("invalid arguments: {e}")))
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
