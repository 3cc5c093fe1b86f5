// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport: the agent tool surface and the frontend gateway share a
//! single axum router.

pub mod auth;
pub mod http;
pub mod state;

pub use state::Broker;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Build the axum `Router` with all HTTP routes.
pub fn build_router(state: Arc<Broker>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/ready", get(http::ready))
        .route("/api/v1/shutdown", post(http::shutdown))
        .route("/api/v1/tools/cancel", post(http::tool_cancel))
        .route("/api/v1/tools/{tool}", post(http::tool_call))
        .route("/api/v1/events", get(http::events))
        .route("/api/v1/sessions", get(http::list_sessions))
        .route("/api/v1/sessions/{id}", get(http::get_session))
        .route("/api/v1/sessions/{id}/select", post(http::select))
        .route("/api/v1/sessions/{id}/highlight", post(http::highlight))
        .route("/api/v1/sessions/{id}/message", post(http::session_message))
        .route("/api/v1/sessions/{id}/key", post(http::key))
        .route("/api/v1/message", post(http::broadcast_message))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
