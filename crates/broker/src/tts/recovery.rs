// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audio-device recovery state machine.
//!
//! Player failures advance `healthy → degraded → recovering(1..N) → down`;
//! each `recovering` step schedules an escalating recovery attempt with
//! exponential backoff. A successful playback returns the device to
//! `healthy`. The failure counter resets once 5× the cooldown passes
//! without a new failure, so isolated glitches do not accumulate forever.
//!
//! The concrete recovery actions (suspend/resume sinks, kill stray players,
//! restart the daemon) live behind the engine's recovery command; this
//! module only decides *when* to act and what to announce.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Recovery attempts before the device is declared down.
const MAX_ATTEMPTS: u32 = 5;

/// Base delay before the first recovery attempt; doubles per stage.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Cap on the per-stage backoff delay.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Observable audio-device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseState {
    Healthy,
    Degraded,
    Recovering(u32),
    Down,
}

impl PulseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Recovering(_) => "recovering",
            Self::Down => "down",
        }
    }

    /// Non-urgent speech is dropped while recovery is in progress or the
    /// device is down. Urgent speech is always attempted.
    pub fn drops_nonurgent(&self) -> bool {
        matches!(self, Self::Recovering(_) | Self::Down)
    }
}

impl Serialize for PulseState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Recovering(n) => serializer.serialize_str(&format!("recovering({n})")),
            other => serializer.serialize_str(other.as_str()),
        }
    }
}

/// A recovery attempt the engine should run after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryAttempt {
    pub stage: u32,
    pub delay: Duration,
}

/// What a recorded failure asks the engine to do.
#[derive(Debug, Clone, Copy)]
pub struct FailurePlan {
    pub state: PulseState,
    /// True exactly once per outage, on the transition into recovery.
    pub emit_pulse_down: bool,
    pub attempt: Option<RecoveryAttempt>,
}

struct Inner {
    state: PulseState,
    failures: u32,
    last_failure: Option<Instant>,
    pulsed: bool,
}

/// Tracks playback failures and plans recovery.
pub struct RecoveryTracker {
    inner: parking_lot::Mutex<Inner>,
    cooldown: Duration,
}

impl RecoveryTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: parking_lot::Mutex::new(Inner {
                state: PulseState::Healthy,
                failures: 0,
                last_failure: None,
                pulsed: false,
            }),
            cooldown,
        }
    }

    pub fn state(&self) -> PulseState {
        self.inner.lock().state
    }

    pub fn drops_nonurgent(&self) -> bool {
        self.state().drops_nonurgent()
    }

    /// Record a player failure and return the plan for it.
    pub fn record_failure(&self, now: Instant) -> FailurePlan {
        let mut inner = self.inner.lock();

        // Quiet period reset: failures long past are forgotten.
        if let Some(last) = inner.last_failure {
            if now.saturating_duration_since(last) >= self.cooldown * 5 {
                inner.failures = 0;
            }
        }
        inner.last_failure = Some(now);
        inner.failures = inner.failures.saturating_add(1);

        let (state, attempt) = match inner.failures {
            1 => (PulseState::Degraded, None),
            n if n <= MAX_ATTEMPTS + 1 => {
                let stage = n - 1;
                let delay = backoff(stage);
                (PulseState::Recovering(stage), Some(RecoveryAttempt { stage, delay }))
            }
            _ => (PulseState::Down, None),
        };
        inner.state = state;

        let emit_pulse_down = matches!(state, PulseState::Recovering(_)) && !inner.pulsed;
        if emit_pulse_down {
            inner.pulsed = true;
        }
        FailurePlan { state, emit_pulse_down, attempt }
    }

    /// Record a successful playback. Returns true when a `pulse_recovered`
    /// event should be emitted (exactly once per outage).
    pub fn record_success(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.state = PulseState::Healthy;
        inner.failures = 0;
        std::mem::take(&mut inner.pulsed)
    }
}

fn backoff(stage: u32) -> Duration {
    let shift = stage.saturating_sub(1).min(16);
    BACKOFF_BASE
        .checked_mul(1u32 << shift)
        .map(|d| d.min(BACKOFF_CAP))
        .unwrap_or(BACKOFF_CAP)
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
