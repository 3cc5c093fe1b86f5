// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level broker runner — shared by `main` and integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::bus::EventBus;
use crate::config::Config;
use crate::dispatcher::ToolDispatcher;
use crate::engine::InboxEngine;
use crate::presenter::{self, PresenterHandle};
use crate::registry::SessionRegistry;
use crate::transport::state::{Broker, BrokerSettings};
use crate::transport::build_router;
use crate::tts::cache::ArtifactCache;
use crate::tts::{TtsEngine, TtsSettings};

/// How often stale sessions are pruned and health is swept.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / PARLEY_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("PARLEY_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// A fully-wired broker with its listener bound, ready to serve.
pub struct PreparedBroker {
    pub broker: Arc<Broker>,
    pub addr: SocketAddr,
    listener: TcpListener,
}

/// Build all broker components and bind the HTTP listener.
pub async fn prepare(config: &Config) -> anyhow::Result<PreparedBroker> {
    init_tracing(config);

    let shutdown = CancellationToken::new();
    let bus = EventBus::new();

    let cache = ArtifactCache::new(config.cache_dir())?;
    let tts = TtsEngine::new(
        TtsSettings::from_config(config)?,
        cache,
        bus.clone(),
        config.recovery_cooldown(),
        shutdown.clone(),
    );

    let registry = Arc::new(SessionRegistry::new(bus.clone()));
    let (presenter, presenter_rx) = PresenterHandle::channel();
    let engine =
        InboxEngine::new(Arc::clone(&registry), bus.clone(), Arc::clone(&tts), presenter.clone());
    tokio::spawn(presenter::run(engine.clone(), presenter_rx, shutdown.clone()));

    let dispatcher = ToolDispatcher::new(engine.clone());
    let broker = Arc::new(Broker {
        registry,
        bus,
        tts,
        engine,
        dispatcher,
        presenter,
        settings: BrokerSettings {
            started_at: Instant::now(),
            auth_token: config.auth_token.clone(),
            stale_after: config.stale_after(),
        },
        shutdown,
    });

    let listener = TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    let addr = listener.local_addr()?;
    info!("HTTP listening on {addr}");
    Ok(PreparedBroker { broker, addr, listener })
}

/// Run the broker to completion: serve HTTP, prune stale sessions, and
/// shut down cleanly on SIGINT/SIGTERM or `POST /shutdown`.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let PreparedBroker { broker, addr: _, listener } = prepare(&config).await?;

    tokio::spawn(maintenance(Arc::clone(&broker)));
    tokio::spawn(watch_signals(broker.shutdown.clone()));

    let router = build_router(Arc::clone(&broker));
    axum::serve(listener, router)
        .with_graceful_shutdown(broker.shutdown.clone().cancelled_owned())
        .await?;
    info!("broker stopped");
    Ok(())
}

/// Timed maintenance: stale-session pruning and the audio health check,
/// both every 30 s. Sessions are intentionally in-memory; a broker restart
/// wipes them.
async fn maintenance(broker: Arc<Broker>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // skip first immediate tick
    loop {
        tokio::select! {
            _ = broker.shutdown.cancelled() => break,
            _ = interval.tick() => {
                broker.engine.prune_stale(Instant::now(), broker.settings.stale_after);
                broker.tts.health_check();
            }
        }
    }
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            let _ = ctrl_c.await;
            shutdown.cancel();
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
