// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders and assertion helpers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::dispatcher::ToolDispatcher;
use crate::engine::InboxEngine;
use crate::presenter::{self, PresenterHandle};
use crate::registry::SessionRegistry;
use crate::transport::state::{Broker, BrokerSettings};
use crate::tts::cache::ArtifactCache;
use crate::tts::player::CommandTemplate;
use crate::tts::{TtsEngine, TtsSettings, VoiceDefaults};

/// Convert any displayable error into `anyhow::Error`, keeping test bodies
/// free of unwraps.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Test-only handle bundling the wired broker with the pieces tests poke at
/// directly. Dropping it cancels the background tasks.
pub struct BrokerCtx {
    pub broker: Arc<Broker>,
    pub shutdown: CancellationToken,
    _cache_dir: tempfile::TempDir,
}

impl Drop for BrokerCtx {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for a fully-wired in-process broker with stub TTS commands.
///
/// Must be built inside a tokio runtime: the presenter loop and the TTS
/// playback worker are spawned at build time.
pub struct BrokerBuilder {
    auth_token: Option<String>,
    player: String,
    generator: Option<String>,
    stale_secs: u64,
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self {
            auth_token: None,
            player: "true {file}".to_owned(),
            generator: Some("true {out}".to_owned()),
            stale_secs: 900,
        }
    }

    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn player(mut self, template: &str) -> Self {
        self.player = template.to_owned();
        self
    }

    pub fn no_generator(mut self) -> Self {
        self.generator = None;
        self
    }

    pub fn stale_secs(mut self, secs: u64) -> Self {
        self.stale_secs = secs;
        self
    }

    pub fn build(self) -> anyhow::Result<BrokerCtx> {
        let cache_dir = tempfile::tempdir()?;
        let shutdown = CancellationToken::new();
        let bus = EventBus::new();

        let settings = TtsSettings {
            player: CommandTemplate::parse(&self.player)?,
            generator: self
                .generator
                .as_deref()
                .map(CommandTemplate::parse)
                .transpose()?,
            fallback: None,
            recover: None,
            defaults: VoiceDefaults {
                voice: "default".to_owned(),
                style: "neutral".to_owned(),
                speed: 1.0,
                model: "standard".to_owned(),
                provider: "local".to_owned(),
            },
        };
        let cache = ArtifactCache::new(cache_dir.path())?;
        let tts =
            TtsEngine::new(settings, cache, bus.clone(), Duration::from_secs(60), shutdown.clone());

        let registry = Arc::new(SessionRegistry::new(bus.clone()));
        let (presenter_handle, presenter_rx) = PresenterHandle::channel();
        let engine = InboxEngine::new(
            Arc::clone(&registry),
            bus.clone(),
            Arc::clone(&tts),
            presenter_handle.clone(),
        );
        tokio::spawn(presenter::run(engine.clone(), presenter_rx, shutdown.clone()));

        let dispatcher = ToolDispatcher::new(engine.clone());
        let broker = Arc::new(Broker {
            registry,
            bus,
            tts,
            engine,
            dispatcher,
            presenter: presenter_handle,
            settings: BrokerSettings {
                started_at: Instant::now(),
                auth_token: self.auth_token,
                stale_after: Duration::from_secs(self.stale_secs),
            },
            shutdown: shutdown.clone(),
        });
        Ok(BrokerCtx { broker, shutdown, _cache_dir: cache_dir })
    }
}
