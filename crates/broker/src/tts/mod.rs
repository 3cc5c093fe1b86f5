// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TTS engine: owner of the single audible channel.
//!
//! Guarantees:
//! - at most one artifact is audible at a time (`speech_lock` + the playback
//!   worker);
//! - urgent speech preempts by side-channel: it kills the current player's
//!   process group *without* taking `speech_lock`, then acquires the lock —
//!   the lock queue is fair, so the urgent start is ahead of any queued
//!   non-urgent start;
//! - non-urgent speech is serialised via a FIFO (the worker's channel);
//! - scroll readouts may interrupt prior scroll readouts but never agent
//!   speech.
//!
//! Subprocess lifetimes are tracked by reaper tasks that update engine state
//! when the player exits; the presenter task never spawns, kills, or waits.

pub mod cache;
pub mod player;
pub mod recovery;

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::config::Config;
use crate::event::EventKind;
use crate::session::VoiceProfile;
use cache::{ArtifactCache, ArtifactKey};
use player::CommandTemplate;
use recovery::{PulseState, RecoveryTracker};

/// Who a playback belongs to. Scroll readouts yield to agent speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechCategory {
    Agent,
    Scroll,
}

/// Fully-resolved synthesis parameters for one utterance.
#[derive(Debug, Clone)]
pub struct SpeakRequest {
    pub text: String,
    pub voice: String,
    pub style: String,
    pub speed: f32,
}

/// How a playback attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Audible playback happened (or, for urgent, started).
    Played,
    /// Cut off by an intentional kill (urgent preemption or stop).
    Preempted,
    /// Dropped without playing: device recovering/down.
    Dropped,
    /// Generator or player failure.
    Failed,
    /// Scroll readout superseded before it reached the device.
    Stale,
}

/// Broker-level synthesis defaults; per-session profiles override the first
/// three fields.
#[derive(Debug, Clone)]
pub struct VoiceDefaults {
    pub voice: String,
    pub style: String,
    pub speed: f32,
    pub model: String,
    pub provider: String,
}

/// Parsed command templates and defaults.
pub struct TtsSettings {
    pub player: CommandTemplate,
    pub generator: Option<CommandTemplate>,
    pub fallback: Option<CommandTemplate>,
    pub recover: Option<CommandTemplate>,
    pub defaults: VoiceDefaults,
}

impl TtsSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let parse_opt = |t: &Option<String>| -> anyhow::Result<Option<CommandTemplate>> {
            t.as_deref().map(CommandTemplate::parse).transpose()
        };
        Ok(Self {
            player: CommandTemplate::parse(&config.tts_player)?,
            generator: parse_opt(&config.tts_generator)?,
            fallback: parse_opt(&config.tts_fallback)?,
            recover: parse_opt(&config.audio_recover)?,
            defaults: VoiceDefaults {
                voice: config.voice.clone(),
                style: config.style.clone(),
                speed: config.speed,
                model: config.tts_model.clone(),
                provider: config.tts_provider.clone(),
            },
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct PlaybackHandle {
    pid: u32,
    category: SpeechCategory,
}

struct QueueJob {
    session_id: Option<String>,
    req: SpeakRequest,
    done: Option<oneshot::Sender<PlayOutcome>>,
}

pub struct TtsEngine {
    settings: TtsSettings,
    cache: ArtifactCache,
    bus: EventBus,
    /// Serialises entry to "start playback"; only one holder can be playing.
    speech_lock: Arc<Mutex<()>>,
    /// Currently-audible player, if any. Guarded separately from
    /// `speech_lock` so stop() never serialises with the next start.
    current: parking_lot::Mutex<Option<PlaybackHandle>>,
    /// Pids we killed on purpose; their non-zero exits are not device
    /// failures.
    killed: parking_lot::Mutex<std::collections::HashSet<u32>>,
    recovery: RecoveryTracker,
    /// Scroll-readout generation counter; a readout whose token is behind
    /// the counter has been superseded and skips silently.
    scroll_gen: AtomicU64,
    queue_tx: mpsc::Sender<QueueJob>,
}

impl TtsEngine {
    pub fn new(
        settings: TtsSettings,
        cache: ArtifactCache,
        bus: EventBus,
        cooldown: std::time::Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(64);
        let engine = Arc::new(Self {
            settings,
            cache,
            bus,
            speech_lock: Arc::new(Mutex::new(())),
            current: parking_lot::Mutex::new(None),
            killed: parking_lot::Mutex::new(std::collections::HashSet::new()),
            recovery: RecoveryTracker::new(cooldown),
            scroll_gen: AtomicU64::new(0),
            queue_tx,
        });
        tokio::spawn(playback_worker(Arc::clone(&engine), queue_rx, shutdown));
        engine
    }

    /// Resolve a session voice profile against broker defaults.
    pub fn request_for(&self, profile: &VoiceProfile, text: impl Into<String>) -> SpeakRequest {
        let d = &self.settings.defaults;
        SpeakRequest {
            text: text.into(),
            voice: profile.voice.clone().unwrap_or_else(|| d.voice.clone()),
            style: profile.style.clone().unwrap_or_else(|| d.style.clone()),
            speed: profile.speed.unwrap_or(d.speed),
        }
    }

    pub fn recovery_state(&self) -> PulseState {
        self.recovery.state()
    }

    /// Periodic health check, run from the maintenance tick.
    ///
    /// Probes the registered playback process with signal 0 and clears the
    /// handle if the process is gone — a player that vanished without its
    /// reaper running yet would otherwise be miscounted as still audible
    /// (and a scroll readout would "preempt" a corpse). Returns the
    /// recovery state for the caller to log or surface.
    pub fn health_check(&self) -> PulseState {
        let cleared = {
            let mut current = self.current.lock();
            match *current {
                Some(h) if !crate::registry::is_process_alive(h.pid) => {
                    *current = None;
                    Some(h.pid)
                }
                _ => None,
            }
        };
        if let Some(pid) = cleared {
            warn!("health check: cleared playback handle for gone process {pid}");
        }
        let state = self.recovery.state();
        if state != PulseState::Healthy {
            debug!("health check: audio device {}", state.as_str());
        }
        state
    }

    // -- Speech entry points --------------------------------------------------

    /// Queue an utterance and wait for its playback to finish.
    pub async fn speak_blocking(
        &self,
        session_id: Option<&str>,
        req: SpeakRequest,
    ) -> PlayOutcome {
        let (done_tx, done_rx) = oneshot::channel();
        let job = QueueJob {
            session_id: session_id.map(str::to_owned),
            req,
            done: Some(done_tx),
        };
        if self.queue_tx.send(job).await.is_err() {
            return PlayOutcome::Failed;
        }
        done_rx.await.unwrap_or(PlayOutcome::Failed)
    }

    /// Queue an utterance without waiting.
    pub fn speak_queued(&self, session_id: Option<&str>, req: SpeakRequest) {
        let job = QueueJob { session_id: session_id.map(str::to_owned), req, done: None };
        if self.queue_tx.try_send(job).is_err() {
            warn!("tts queue full, dropping utterance");
            self.emit_speech_failed(session_id, "queue_full");
        }
    }

    /// Preempt current playback and speak immediately. Returns once the
    /// urgent player has started (or failed to); a reaper task finishes the
    /// bookkeeping when it exits.
    pub async fn speak_urgent(
        self: &Arc<Self>,
        session_id: Option<&str>,
        req: SpeakRequest,
    ) -> PlayOutcome {
        let Some(path) = self.prepare(&req).await else {
            self.emit_speech_failed(session_id, "generator");
            return PlayOutcome::Failed;
        };

        // Side-channel preemption: kill first, then join the (fair) lock
        // queue ahead of any non-urgent start still waiting.
        self.stop();
        let guard = Arc::clone(&self.speech_lock).lock_owned().await;
        match self.start_player(&path, SpeechCategory::Agent) {
            Ok((child, pid)) => {
                self.spawn_reaper(child, pid, guard, session_id.map(str::to_owned));
                PlayOutcome::Played
            }
            Err(e) => {
                warn!("urgent player spawn failed: {e:#}");
                self.note_failure();
                self.emit_speech_failed(session_id, "player");
                PlayOutcome::Failed
            }
        }
    }

    /// Kill the current playback's process group. Never takes `speech_lock`.
    pub fn stop(&self) {
        let handle = self.current.lock().take();
        if let Some(h) = handle {
            self.killed.lock().insert(h.pid);
            player::kill_group(h.pid);
        }
    }

    // -- Scroll readouts ------------------------------------------------------

    /// Advance the scroll generation, invalidating readouts in flight.
    pub fn next_scroll_token(&self) -> u64 {
        self.scroll_gen.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn scroll_stale(&self, token: u64) -> bool {
        self.scroll_gen.load(Ordering::Relaxed) != token
    }

    /// Speak a newly-highlighted option label. Asynchronous; skips silently
    /// if the operator has scrolled on, preempts a prior readout, and never
    /// interrupts agent speech.
    pub fn scroll_readout(self: &Arc<Self>, req: SpeakRequest, token: u64) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _ = engine.scroll_readout_inner(req, token).await;
        });
    }

    async fn scroll_readout_inner(self: &Arc<Self>, req: SpeakRequest, token: u64) -> PlayOutcome {
        if self.scroll_stale(token) {
            return PlayOutcome::Stale;
        }
        if self.recovery.drops_nonurgent() {
            return PlayOutcome::Dropped;
        }
        let Some(path) = self.prepare(&req).await else {
            return PlayOutcome::Failed;
        };
        if self.scroll_stale(token) {
            return PlayOutcome::Stale;
        }

        // A prior readout still talking is ours to cut; agent speech is not.
        if self.current_category() == Some(SpeechCategory::Scroll) {
            self.stop();
        }
        let guard = Arc::clone(&self.speech_lock).lock_owned().await;
        if self.scroll_stale(token) {
            return PlayOutcome::Stale;
        }
        match self.start_player(&path, SpeechCategory::Scroll) {
            Ok((child, pid)) => {
                self.spawn_reaper(child, pid, guard, None);
                PlayOutcome::Played
            }
            Err(e) => {
                debug!("scroll readout spawn failed: {e:#}");
                self.note_failure();
                PlayOutcome::Failed
            }
        }
    }

    // -- Internals ------------------------------------------------------------

    fn current_category(&self) -> Option<SpeechCategory> {
        (*self.current.lock()).map(|h| h.category)
    }

    /// Resolve or generate the artifact for a request.
    async fn prepare(&self, req: &SpeakRequest) -> Option<PathBuf> {
        let d = &self.settings.defaults;
        let key = ArtifactKey {
            text: req.text.clone(),
            voice: req.voice.clone(),
            style: req.style.clone(),
            speed: req.speed,
            model: d.model.clone(),
            provider: d.provider.clone(),
        };
        let fp = key.fingerprint();
        if let Some(path) = self.cache.lookup(&fp) {
            return Some(path);
        }

        for template in [&self.settings.generator, &self.settings.fallback] {
            let Some(template) = template else { continue };
            match self.generate_with(template, req, &fp).await {
                Ok(Some(path)) => return Some(path),
                Ok(None) => debug!("generator exited non-zero for {fp}"),
                Err(e) => debug!("generator failed: {e:#}"),
            }
        }
        None
    }

    async fn generate_with(
        &self,
        template: &CommandTemplate,
        req: &SpeakRequest,
        fingerprint: &str,
    ) -> anyhow::Result<Option<PathBuf>> {
        let staged = self.cache.stage()?;
        let out = staged.path().to_string_lossy().into_owned();
        let speed = format!("{}", req.speed);
        let (program, args) = template.build(&[
            ("text", req.text.as_str()),
            ("voice", req.voice.as_str()),
            ("style", req.style.as_str()),
            ("speed", speed.as_str()),
            ("out", out.as_str()),
        ]);
        if !player::run_generator(&program, &args).await? {
            return Ok(None);
        }
        Ok(Some(self.cache.commit(staged, fingerprint)?))
    }

    fn start_player(
        &self,
        path: &std::path::Path,
        category: SpeechCategory,
    ) -> anyhow::Result<(Child, u32)> {
        let file = path.to_string_lossy().into_owned();
        let (program, args) = self.settings.player.build(&[("file", file.as_str())]);
        let child = player::spawn_player(&program, &args)?;
        let pid = child.id().ok_or_else(|| anyhow::anyhow!("player exited before start"))?;
        *self.current.lock() = Some(PlaybackHandle { pid, category });
        Ok((child, pid))
    }

    /// Reap a player off the caller's task, holding the speech lock guard
    /// until the process group is gone.
    fn spawn_reaper(
        self: &Arc<Self>,
        mut child: Child,
        pid: u32,
        guard: OwnedMutexGuard<()>,
        session_id: Option<String>,
    ) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let status = child.wait().await;
            engine.finish_playback(pid, status, session_id.as_deref());
            drop(guard);
        });
    }

    /// Shared post-exit bookkeeping for every playback path.
    fn finish_playback(
        &self,
        pid: u32,
        status: std::io::Result<ExitStatus>,
        session_id: Option<&str>,
    ) -> PlayOutcome {
        {
            let mut current = self.current.lock();
            if (*current).map(|h| h.pid) == Some(pid) {
                *current = None;
            }
        }
        if self.killed.lock().remove(&pid) {
            return PlayOutcome::Preempted;
        }
        match status {
            Ok(s) if s.success() => {
                if self.recovery.record_success() {
                    self.bus.publish(
                        None,
                        EventKind::PulseRecovered,
                        serde_json::json!({ "state": self.recovery.state() }),
                    );
                }
                PlayOutcome::Played
            }
            Ok(s) => {
                debug!("player exited non-zero: {s}");
                self.note_failure();
                self.emit_speech_failed(session_id, "player");
                PlayOutcome::Failed
            }
            Err(e) => {
                warn!("player wait failed: {e}");
                self.note_failure();
                PlayOutcome::Failed
            }
        }
    }

    /// Advance the recovery machine and act on its plan.
    fn note_failure(&self) {
        let plan = self.recovery.record_failure(Instant::now());
        if plan.emit_pulse_down {
            self.bus.publish(
                None,
                EventKind::PulseDown,
                serde_json::json!({ "state": plan.state }),
            );
        }
        if let Some(attempt) = plan.attempt {
            let template = self.settings.recover.clone();
            tokio::spawn(async move {
                tokio::time::sleep(attempt.delay).await;
                let Some(template) = template else { return };
                let stage = attempt.stage.to_string();
                let (program, args) = template.build(&[("stage", stage.as_str())]);
                match player::run_generator(&program, &args).await {
                    Ok(true) => debug!("audio recovery stage {stage} ran"),
                    Ok(false) => debug!("audio recovery stage {stage} exited non-zero"),
                    Err(e) => debug!("audio recovery stage {stage} failed: {e:#}"),
                }
            });
        }
    }

    fn emit_speech_failed(&self, session_id: Option<&str>, reason: &str) {
        self.bus.publish(
            session_id,
            EventKind::SpeechFailed,
            serde_json::json!({ "reason": reason }),
        );
    }
}

/// Drains the non-urgent FIFO; one job plays at a time.
async fn playback_worker(
    engine: Arc<TtsEngine>,
    mut queue_rx: mpsc::Receiver<QueueJob>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = queue_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let outcome = play_nonurgent(&engine, &job).await;
        if let Some(done) = job.done {
            let _ = done.send(outcome);
        }
    }
}

async fn play_nonurgent(engine: &Arc<TtsEngine>, job: &QueueJob) -> PlayOutcome {
    let session_id = job.session_id.as_deref();
    if engine.recovery.drops_nonurgent() {
        engine.emit_speech_failed(session_id, "audio_down");
        return PlayOutcome::Dropped;
    }
    let Some(path) = engine.prepare(&job.req).await else {
        engine.emit_speech_failed(session_id, "generator");
        return PlayOutcome::Failed;
    };
    let outcome = {
        let _guard = engine.speech_lock.lock().await;
        match engine.start_player(&path, SpeechCategory::Agent) {
            Ok((mut child, pid)) => {
                let status = child.wait().await;
                engine.finish_playback(pid, status, session_id)
            }
            Err(e) => {
                warn!("player spawn failed: {e:#}");
                engine.note_failure();
                engine.emit_speech_failed(session_id, "player");
                PlayOutcome::Failed
            }
        }
    };
    if outcome == PlayOutcome::Preempted {
        // A cut-off line resolves only after the preemptor has been heard:
        // the urgent reaper holds the speech lock until its player exits,
        // and the lock queue is fair, so this acquisition completes when
        // the urgent playback does.
        let _heard = engine.speech_lock.lock().await;
    }
    outcome
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
