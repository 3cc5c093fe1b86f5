// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end broker scenarios.
//!
//! Spawns the real `parley` binary as a subprocess with stub TTS commands
//! and exercises it over HTTP and the SSE event stream.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::StreamExt;

/// Resolve the path to the compiled `parley` binary.
pub fn parley_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("parley")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Write an executable stub player script and return its command template.
pub fn script_player(dir: &Path, body: &str) -> anyhow::Result<String> {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("player.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
    Ok(format!("{} {{file}}", script.display()))
}

/// Extra settings for a spawned broker.
pub struct BrokerOptions {
    pub player: String,
    pub generator: String,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self { player: "true {file}".to_owned(), generator: "true {out}".to_owned() }
    }
}

/// A running `parley` process that is killed on drop.
pub struct BrokerProcess {
    child: Child,
    pub port: u16,
    client: reqwest::Client,
    _cache: tempfile::TempDir,
}

impl BrokerProcess {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(BrokerOptions::default()).await
    }

    pub async fn start_with(options: BrokerOptions) -> anyhow::Result<Self> {
        let port = free_port()?;
        let cache = tempfile::tempdir()?;
        let child = Command::new(parley_binary())
            .args([
                "--port",
                &port.to_string(),
                "--host",
                "127.0.0.1",
                "--tts-player",
                &options.player,
                "--tts-generator",
                &options.generator,
                "--cache-dir",
                &cache.path().to_string_lossy(),
                "--log-level",
                "warn",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let broker =
            Self { child, port, client: reqwest::Client::new(), _cache: cache };
        broker.wait_ready().await?;
        Ok(broker)
    }

    async fn wait_ready(&self) -> anyhow::Result<()> {
        for _ in 0..100 {
            if let Ok(resp) = self.client.get(self.url("/api/v1/ready")).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("broker on port {} never became ready", self.port)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    /// Invoke a tool for a session, optionally tagging the call for later
    /// cancellation. Returns an owned future so callers can `tokio::spawn`
    /// concurrent tool calls.
    pub fn tool(
        &self,
        session: &str,
        call_id: Option<&str>,
        name: &str,
        body: serde_json::Value,
    ) -> impl std::future::Future<Output = Result<reqwest::Response, reqwest::Error>> + Send + 'static
    {
        let mut req = self
            .client
            .post(self.url(&format!("/api/v1/tools/{name}")))
            .header("x-parley-session", session)
            .json(&body);
        if let Some(call_id) = call_id {
            req = req.header("x-parley-call", call_id);
        }
        req.send()
    }

    pub async fn register(&self, session: &str) -> anyhow::Result<()> {
        let resp = self.tool(session, None, "register_session", serde_json::json!({})).await?;
        anyhow::ensure!(resp.status().is_success(), "register failed: {}", resp.status());
        Ok(())
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<reqwest::Response> {
        Ok(self.client.post(self.url(path)).json(&body).send().await?)
    }

    pub async fn get_json(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        Ok(self.client.get(self.url(path)).send().await?.json().await?)
    }

    /// Poll until the session's active item shows the expected first option
    /// label.
    pub async fn wait_for_choices(&self, session: &str, first_label: &str) -> anyhow::Result<()> {
        for _ in 0..100 {
            let detail = self.get_json(&format!("/api/v1/sessions/{session}")).await?;
            if detail["active_item"]["options"][0]["label"] == first_label {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::bail!("choices starting with {first_label} never became active")
    }

    /// Open the SSE event stream.
    pub async fn subscribe(&self) -> anyhow::Result<EventStream> {
        let resp = self.client.get(self.url("/api/v1/events")).send().await?;
        anyhow::ensure!(resp.status().is_success(), "subscribe failed: {}", resp.status());
        Ok(EventStream { body: Box::pin(resp.bytes_stream()), buffer: String::new() })
    }
}

impl Drop for BrokerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A parsed SSE frame: `(kind, data)`.
pub type SseFrame = (String, serde_json::Value);

/// Minimal SSE reader over a reqwest byte stream.
pub struct EventStream {
    body: std::pin::Pin<
        Box<dyn futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buffer: String,
}

impl EventStream {
    /// Next full SSE frame, skipping heartbeats.
    pub async fn next_event(&mut self) -> anyhow::Result<SseFrame> {
        loop {
            if let Some(frame) = self.pop_frame()? {
                if frame.0 == "heartbeat" {
                    continue;
                }
                return Ok(frame);
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("event stream closed"))??;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    fn pop_frame(&mut self) -> anyhow::Result<Option<SseFrame>> {
        while let Some(end) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..end + 2).collect();
            let mut kind = String::new();
            let mut data = String::new();
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    kind = rest.trim().to_owned();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = rest.trim().to_owned();
                }
            }
            if kind.is_empty() {
                // Comment/keep-alive frame; look at the next one.
                continue;
            }
            let value = if data.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_str(&data)?
            };
            return Ok(Some((kind, value)));
        }
        Ok(None)
    }
}
