// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frontend gateway handlers: session snapshots and operator actions
//! pushed back into the presenter.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::ErrorCode;
use crate::inbox::ItemPayload;
use crate::presenter::{KeyPress, PresenterCommand};
use crate::session::Session;
use crate::transport::state::Broker;

/// `GET /api/v1/sessions` — snapshot of all sessions.
pub async fn list_sessions(State(s): State<Arc<Broker>>) -> impl IntoResponse {
    let focused = s.registry.focused_id();
    let snapshots: Vec<_> = s
        .registry
        .list()
        .into_iter()
        .map(|session| {
            let is_focused = focused.as_deref() == Some(session.id.as_str());
            session.snapshot(is_focused)
        })
        .collect();
    Json(snapshots)
}

/// `GET /api/v1/sessions/{id}` — detail view used by frontends to re-read
/// state after an event-stream reconnect.
pub async fn get_session(
    State(s): State<Arc<Broker>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(session) = s.registry.get(&id) else {
        return ErrorCode::NotFound.to_http_response("no such session").into_response();
    };
    let focused = s.registry.focused_id().as_deref() == Some(id.as_str());

    let active_item = session.active_item().map(|item| match &item.payload {
        ItemPayload::Choices { preamble, options, multi } => serde_json::json!({
            "id": item.id,
            "kind": "choices",
            "preamble": preamble,
            "options": options,
            "multi": multi,
        }),
        ItemPayload::Speech { text, mode } => serde_json::json!({
            "id": item.id,
            "kind": "speech",
            "text": text,
            "mode": mode.as_str(),
        }),
    });
    let history: Vec<_> = session
        .history_tail(20)
        .into_iter()
        .map(|item| {
            serde_json::json!({
                "id": item.id,
                "kind": item.payload.kind_str(),
                "status": item.status(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "session": session.snapshot(focused),
        "active_item": active_item,
        "history": history,
    }))
    .into_response()
}

fn with_session(
    s: &Arc<Broker>,
    id: &str,
    f: impl FnOnce(Arc<Session>),
) -> axum::response::Response {
    match s.registry.get(id) {
        Some(session) => {
            f(session);
            Json(serde_json::json!({ "accepted": true })).into_response()
        }
        None => ErrorCode::NotFound.to_http_response("no such session").into_response(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectRequest {
    pub label: String,
    #[serde(default)]
    pub summary: Option<String>,
}

/// `POST /api/v1/sessions/{id}/select` — resolve the active choices item.
pub async fn select(
    State(s): State<Arc<Broker>>,
    Path(id): Path<String>,
    Json(req): Json<SelectRequest>,
) -> impl IntoResponse {
    with_session(&s, &id, |session| {
        s.presenter.send(PresenterCommand::Select {
            session_id: session.id.clone(),
            label: req.label,
            summary: req.summary,
        });
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct HighlightRequest {
    pub index: usize,
}

/// `POST /api/v1/sessions/{id}/highlight` — move the highlight, with
/// readout.
pub async fn highlight(
    State(s): State<Arc<Broker>>,
    Path(id): Path<String>,
    Json(req): Json<HighlightRequest>,
) -> impl IntoResponse {
    with_session(&s, &id, |session| {
        s.presenter.send(PresenterCommand::Highlight {
            session_id: session.id.clone(),
            index: req.index,
        });
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

/// `POST /api/v1/sessions/{id}/message` — queue an operator note for the
/// agent's next tool response.
pub async fn session_message(
    State(s): State<Arc<Broker>>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> impl IntoResponse {
    with_session(&s, &id, |session| session.queue_message(req.text))
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

/// `POST /api/v1/sessions/{id}/key` — deliver a key press as if typed.
pub async fn key(
    State(s): State<Arc<Broker>>,
    Path(id): Path<String>,
    Json(req): Json<KeyRequest>,
) -> impl IntoResponse {
    let Some(key) = KeyPress::parse(&req.key) else {
        return ErrorCode::InvalidRequest
            .to_http_response(format!("unknown key: {}", req.key))
            .into_response();
    };
    with_session(&s, &id, |session| {
        s.presenter.send(PresenterCommand::Key { session_id: Some(session.id.clone()), key });
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    pub text: String,
    /// When true, queue for every session; otherwise the focused one.
    #[serde(default)]
    pub all: bool,
}

/// `POST /api/v1/message` — broadcast form for all or the focused session.
pub async fn broadcast_message(
    State(s): State<Arc<Broker>>,
    Json(req): Json<BroadcastRequest>,
) -> impl IntoResponse {
    let queued = if req.all {
        let sessions = s.registry.list();
        for session in &sessions {
            session.queue_message(req.text.clone());
        }
        sessions.len()
    } else {
        match s.registry.focused() {
            Some(session) => {
                session.queue_message(req.text);
                1
            }
            None => 0,
        }
    };
    Json(serde_json::json!({ "queued": queued }))
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
