// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess plumbing for generators and players.
//!
//! Players are launched into their own process group so a kill reaches
//! wrapper scripts and their descendants; partial kills would leave zombies
//! holding the audio device.

use std::process::Stdio;

use anyhow::Context;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::debug;

/// A whitespace-split command template with `{placeholder}` substitution.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    words: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> anyhow::Result<Self> {
        let words: Vec<String> = template.split_whitespace().map(str::to_owned).collect();
        if words.is_empty() {
            anyhow::bail!("empty command template");
        }
        Ok(Self { words })
    }

    /// Expand the template into `(program, args)` with all `{name}`
    /// placeholders substituted.
    pub fn build(&self, substitutions: &[(&str, &str)]) -> (String, Vec<String>) {
        let expand = |word: &String| {
            let mut out = word.clone();
            for (name, value) in substitutions {
                out = out.replace(&format!("{{{name}}}"), value);
            }
            out
        };
        let program = expand(&self.words[0]);
        let args = self.words[1..].iter().map(expand).collect();
        (program, args)
    }
}

/// Spawn a player in a new process group, stdio silenced.
pub fn spawn_player(program: &str, args: &[String]) -> anyhow::Result<Child> {
    Command::new(program)
        .args(args)
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn player {program}"))
}

/// Kill a player's entire process group. Runs without any engine lock:
/// kill(2) must never serialise with the next playback start.
pub fn kill_group(pid: u32) {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(-pid_i32), Signal::SIGKILL) {
        debug!("kill process group {pid}: {e}");
    }
}

/// Run a generator command to completion, capturing nothing. Returns
/// whether it exited zero.
pub async fn run_generator(program: &str, args: &[String]) -> anyhow::Result<bool> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .with_context(|| format!("spawn generator {program}"))?;
    Ok(status.success())
}

#[cfg(test)]
#[path = "player_tests.rs"]
mod tests;
