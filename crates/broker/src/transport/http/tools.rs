// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent tool surface handlers.
//!
//! Session identity and call ids travel in transport metadata (headers),
//! never in tool arguments: `x-parley-session` carries the stable session
//! identity, `x-parley-call` an optional caller-chosen id that
//! `POST /tools/cancel` can target while the call is still in flight.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::transport::state::Broker;

pub const SESSION_HEADER: &str = "x-parley-session";
pub const CALL_HEADER: &str = "x-parley-call";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

/// `POST /api/v1/tools/{tool}` — invoke a named tool.
pub async fn tool_call(
    State(s): State<Arc<Broker>>,
    Path(tool): Path<String>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    let session_key = header_str(&headers, SESSION_HEADER);
    let call_id = header_str(&headers, CALL_HEADER).map(str::to_owned);
    let args = body.map(|Json(v)| v).unwrap_or_else(|| serde_json::json!({}));

    match s.dispatcher.dispatch(&tool, session_key, call_id, args).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.code.to_http_response(e.message).into_response(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelRequest {
    pub session_id: String,
    pub call_id: String,
}

/// `POST /api/v1/tools/cancel` — transport-level cancellation of an
/// in-flight tool call.
pub async fn tool_cancel(
    State(s): State<Arc<Broker>>,
    Json(req): Json<CancelRequest>,
) -> impl IntoResponse {
    match s.dispatcher.cancel(&req.session_id, &req.call_id) {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.code.to_http_response(e.message).into_response(),
    }
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
