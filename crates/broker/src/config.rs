// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Interaction broker between autonomous agents and a single operator.
#[derive(Debug, Clone, Parser)]
#[command(name = "parley", version, about)]
pub struct Config {
    /// HTTP port to listen on (0 = ephemeral).
    #[arg(long, env = "PARLEY_PORT", default_value = "4725")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "PARLEY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Bearer token for API authentication.
    #[arg(long, env = "PARLEY_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Directory for cached speech artifacts.
    #[arg(long, env = "PARLEY_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Audio player command template. `{file}` expands to the artifact path.
    #[arg(long, env = "PARLEY_TTS_PLAYER", default_value = "paplay {file}")]
    pub tts_player: String,

    /// Speech generator command template. `{text}`, `{voice}`, and `{out}`
    /// expand to the line, the voice name, and the output path.
    #[arg(long, env = "PARLEY_TTS_GENERATOR")]
    pub tts_generator: Option<String>,

    /// Offline fallback generator, same template shape as --tts-generator.
    #[arg(long, env = "PARLEY_TTS_FALLBACK")]
    pub tts_fallback: Option<String>,

    /// Audio recovery command template, run per escalation stage.
    /// `{stage}` expands to the attempt number.
    #[arg(long, env = "PARLEY_AUDIO_RECOVER")]
    pub audio_recover: Option<String>,

    /// Default TTS voice for sessions without a voice profile.
    #[arg(long, env = "PARLEY_VOICE", default_value = "default")]
    pub voice: String,

    /// Default TTS style.
    #[arg(long, env = "PARLEY_STYLE", default_value = "neutral")]
    pub style: String,

    /// Default speech speed multiplier.
    #[arg(long, env = "PARLEY_SPEED", default_value = "1.0")]
    pub speed: f32,

    /// Synthesis model identifier (part of the artifact cache key).
    #[arg(long, env = "PARLEY_TTS_MODEL", default_value = "standard")]
    pub tts_model: String,

    /// Synthesis provider identifier (part of the artifact cache key).
    #[arg(long, env = "PARLEY_TTS_PROVIDER", default_value = "local")]
    pub tts_provider: String,

    /// Seconds without agent activity before a session is considered stale.
    #[arg(long, env = "PARLEY_STALE_SECS", default_value = "900")]
    pub stale_secs: u64,

    /// Cooldown window in seconds for the audio recovery state machine.
    #[arg(long, env = "PARLEY_RECOVERY_COOLDOWN", default_value = "60")]
    pub recovery_cooldown: u64,

    /// Log format (json or text).
    #[arg(long, env = "PARLEY_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PARLEY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.tts_player.contains("{file}") {
            anyhow::bail!("--tts-player template must contain {{file}}");
        }
        for (flag, template) in
            [("--tts-generator", &self.tts_generator), ("--tts-fallback", &self.tts_fallback)]
        {
            if let Some(t) = template {
                if !t.contains("{out}") {
                    anyhow::bail!("{flag} template must contain {{out}}");
                }
            }
        }
        if self.speed <= 0.0 {
            anyhow::bail!("--speed must be positive");
        }
        if self.stale_secs == 0 {
            anyhow::bail!("--stale-secs must be positive");
        }
        Ok(())
    }

    /// Resolve the artifact cache directory, defaulting under the system
    /// temp dir when unset.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("parley-cache"))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }

    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_secs(self.recovery_cooldown)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
