// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::dispatcher::ToolDispatcher;
use crate::engine::InboxEngine;
use crate::presenter::PresenterHandle;
use crate::registry::SessionRegistry;
use crate::tts::TtsEngine;

/// Static broker settings (immutable after construction).
pub struct BrokerSettings {
    pub started_at: Instant,
    pub auth_token: Option<String>,
    pub stale_after: Duration,
}

/// Shared broker state passed to all handlers via the axum `State`
/// extractor.
pub struct Broker {
    pub registry: Arc<SessionRegistry>,
    pub bus: EventBus,
    pub tts: Arc<TtsEngine>,
    pub engine: InboxEngine,
    pub dispatcher: ToolDispatcher,
    pub presenter: PresenterHandle,
    pub settings: BrokerSettings,
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("sessions", &self.registry.len())
            .field("auth_token", &self.settings.auth_token.is_some())
            .finish()
    }
}
