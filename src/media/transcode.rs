//! Ogg → MP3 transcoding via an external codec process.
//!
//! Input and output live in a scoped temp directory that is removed on
//! every exit path: success, spawn failure, non-zero exit, timeout, and
//! read failure.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::config::TranscodeConfig;
use crate::error::{KiokuError, Result};

pub struct Transcoder {
    codec_cmd: String,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self::with_command(&config.codec_cmd, Duration::from_secs(config.timeout_secs))
    }

    pub fn with_command(codec_cmd: &str, timeout: Duration) -> Self {
        Self {
            codec_cmd: codec_cmd.to_string(),
            timeout,
        }
    }

    /// Only Ogg containers are transcoded; everything else passes through.
    pub fn is_eligible(mime_type: &str) -> bool {
        mime_type.to_ascii_lowercase().contains("ogg")
    }

    /// Convert Ogg audio to MP3. Identity transform for any other MIME type.
    pub async fn transcode(&self, bytes: &[u8], mime_type: &str) -> Result<Vec<u8>> {
        if !Self::is_eligible(mime_type) {
            return Ok(bytes.to_vec());
        }

        // Dropped with its contents on every return below.
        let work = tempfile::tempdir()?;
        let input = work.path().join("input.ogg");
        let output = work.path().join("output.mp3");

        tokio::fs::write(&input, bytes).await?;

        debug!(codec = %self.codec_cmd, len = bytes.len(), "transcoding ogg audio to mp3");

        let run = Command::new(&self.codec_cmd)
            .arg("-i")
            .arg(&input)
            .args(["-vn", "-f", "mp3"])
            .arg(&output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let completed = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                return Err(KiokuError::Transcode(format!(
                    "{} timed out after {}s",
                    self.codec_cmd,
                    self.timeout.as_secs()
                )));
            }
            Ok(Err(e)) => {
                return Err(KiokuError::Transcode(format!(
                    "failed to run {}: {e}",
                    self.codec_cmd
                )));
            }
            Ok(Ok(out)) => out,
        };

        if !completed.status.success() {
            let stderr = String::from_utf8_lossy(&completed.stderr);
            return Err(KiokuError::Transcode(format!(
                "{} exited with {}: {}",
                self.codec_cmd,
                completed.status,
                stderr.lines().last().unwrap_or("").trim()
            )));
        }

        tokio::fs::read(&output)
            .await
            .map_err(|e| KiokuError::Transcode(format!("failed to read codec output: {e}")))
    }
}
