//! Transport sidecar: a Node process speaking the chat protocol, driven
//! over a local HTTP API. This module owns the process lifecycle (spawn,
//! log forwarding, graceful stop) and the `ChatClient` implementation
//! against it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channels::{ChatClient, SendContent};
use crate::envelope::InboundEnvelope;
use crate::error::{KiokuError, Result};

pub const DEFAULT_SIDECAR_PORT: u16 = 3721;

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the sidecar, escalating to kill if it does not exit in time.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping transport sidecar");

        // SIGTERM first so the sidecar can close its chat session.
        if let Some(pid) = self.child.id() {
            let _ = std::process::Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .status();
        } else {
            // Already reaped; nothing left to signal.
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(std::time::Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "sidecar exited"),
            Ok(Err(e)) => warn!("error waiting for sidecar: {e}"),
            Err(_) => {
                warn!("sidecar did not exit, killing");
                let _ = self.child.kill().await;
            }
        }
        Ok(())
    }
}

/// Locate the sidecar directory: explicit config path, the
/// `KIOKU_SIDECAR_DIR` environment variable, then common relative paths.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.join("package.json").exists() {
            return Ok(path.to_path_buf());
        }
        return Err(KiokuError::Channel(format!(
            "sidecar directory missing package.json: {}",
            path.display()
        )));
    }

    if let Ok(dir) = std::env::var("KIOKU_SIDECAR_DIR") {
        let path = PathBuf::from(&dir);
        if path.join("package.json").exists() {
            return Ok(path);
        }
        warn!(path = %dir, "KIOKU_SIDECAR_DIR set but package.json not found");
    }

    for rel in ["sidecar", "../sidecar", "../../sidecar"] {
        let path = PathBuf::from(rel);
        if path.join("package.json").exists() {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    Err(KiokuError::Channel(
        "transport sidecar not found; set KIOKU_SIDECAR_DIR or channel.sidecar_dir".to_string(),
    ))
}

/// Spawn the sidecar and forward its output into tracing.
pub async fn start_sidecar(sidecar_dir: &Path, port: u16) -> Result<SidecarProcess> {
    if !sidecar_dir.join("dist/index.js").exists() {
        return Err(KiokuError::Channel(format!(
            "sidecar not built at {}; run `npm install && npm run build` there first",
            sidecar_dir.display()
        )));
    }

    info!(path = %sidecar_dir.display(), port, "starting transport sidecar");

    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(sidecar_dir)
        .env("KIOKU_SIDECAR_PORT", port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| KiokuError::Channel(format!("failed to spawn sidecar: {e}")))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "sidecar", "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "sidecar", "{line}");
            }
        });
    }

    // Give the process a moment to fail fast on startup errors.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    match child.try_wait() {
        Ok(Some(status)) => {
            return Err(KiokuError::Channel(format!(
                "sidecar exited immediately with status {status}"
            )));
        }
        Ok(None) => {}
        Err(e) => {
            return Err(KiokuError::Channel(format!(
                "failed to check sidecar status: {e}"
            )));
        }
    }

    info!(port, "transport sidecar started");
    Ok(SidecarProcess { child, port })
}

// ---------------------------------------------------------------------------
// HTTP client against the sidecar
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SidecarClient {
    http: reqwest::Client,
    base: String,
}

impl SidecarClient {
    pub fn new(port: u16) -> Result<Self> {
        // Long-poll on /events runs for up to 30s; leave headroom.
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| KiokuError::Channel(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: format!("http://127.0.0.1:{port}"),
        })
    }

    /// Long-poll the sidecar for inbound envelopes and feed them into the
    /// gateway channel until `running` is cleared.
    pub async fn run_event_loop(
        &self,
        inbound_tx: mpsc::Sender<InboundEnvelope>,
        running: Arc<AtomicBool>,
    ) {
        while running.load(Ordering::SeqCst) {
            let response = self
                .http
                .get(format!("{}/events", self.base))
                .query(&[("timeout", "30")])
                .send()
                .await;

            let envelopes: Vec<InboundEnvelope> = match response {
                Ok(resp) if resp.status().is_success() => match resp.json().await {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!("malformed sidecar event batch: {e}");
                        continue;
                    }
                },
                Ok(resp) => {
                    warn!(status = %resp.status(), "sidecar event poll failed");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
                Err(e) => {
                    warn!("sidecar event poll error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            for envelope in envelopes {
                debug!(chat_id = %envelope.chat_id, "inbound envelope");
                if inbound_tx.send(envelope).await.is_err() {
                    // Gateway gone; shut the loop down.
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl ChatClient for SidecarClient {
    async fn download_media(&self, media_ref: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .post(format!("{}/download", self.base))
            .json(&json!({ "mediaRef": media_ref }))
            .send()
            .await
            .map_err(|e| KiokuError::Download(format!("download request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(KiokuError::Download(format!(
                "download failed with status {}",
                resp.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct DownloadResponse {
            data: String,
        }
        let body: DownloadResponse = resp
            .json()
            .await
            .map_err(|e| KiokuError::Download(format!("malformed download response: {e}")))?;

        base64::engine::general_purpose::STANDARD
            .decode(body.data)
            .map_err(|e| KiokuError::Download(format!("invalid media encoding: {e}")))
    }

    async fn send(&self, chat_id: &str, content: SendContent) -> Result<()> {
        let body = to_wire(chat_id, &content);
        let resp = self
            .http
            .post(format!("{}/send", self.base))
            .json(&body)
            .send()
            .await
            .map_err(|e| KiokuError::Channel(format!("send request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(KiokuError::Channel(format!(
                "send failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn to_wire(chat_id: &str, content: &SendContent) -> serde_json::Value {
    let b64 = base64::engine::general_purpose::STANDARD;
    match content {
        SendContent::Image { bytes, caption } => json!({
            "chatId": chat_id,
            "type": "image",
            "data": b64.encode(bytes),
            "caption": caption,
        }),
        SendContent::Video { bytes, caption } => json!({
            "chatId": chat_id,
            "type": "video",
            "data": b64.encode(bytes),
            "caption": caption,
        }),
        SendContent::Audio { bytes, mime_type } => json!({
            "chatId": chat_id,
            "type": "audio",
            "data": b64.encode(bytes),
            "mimeType": mime_type,
        }),
        SendContent::Text(text) => json!({
            "chatId": chat_id,
            "type": "text",
            "text": text,
        }),
    }
}
