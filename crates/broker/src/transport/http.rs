// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

mod events;
mod sessions;
mod tools;

pub use events::*;
pub use sessions::*;
pub use tools::*;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::transport::state::Broker;

// -- Lifecycle ----------------------------------------------------------------

/// `GET /api/v1/health` — liveness plus audio-recovery state.
pub async fn health(State(s): State<Arc<Broker>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": s.settings.started_at.elapsed().as_secs(),
        "sessions": s.registry.len(),
        "focused": s.registry.focused_id(),
        "audio": s.tts.recovery_state(),
    }))
}

/// `GET /api/v1/ready`
pub async fn ready(State(_s): State<Arc<Broker>>) -> impl IntoResponse {
    Json(serde_json::json!({ "ready": true }))
}

/// `POST /api/v1/shutdown` — initiate graceful broker shutdown.
pub async fn shutdown(State(s): State<Arc<Broker>>) -> impl IntoResponse {
    s.shutdown.cancel();
    Json(serde_json::json!({ "accepted": true }))
}
