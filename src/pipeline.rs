//! The view-once processing pipeline.
//!
//! Linear state machine per inbound envelope: detect, owner filter,
//! extract, download, conditional transcode, conditional persist,
//! conditional forward, record. Every stage contains its own failures;
//! nothing here panics or propagates an error to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::channels::ChatClient;
use crate::config::{ConfigHandle, HandlerConfig};
use crate::envelope::{self, InboundEnvelope, ViewOnceDescriptor};
use crate::forward;
use crate::media::{self, store, transcode::Transcoder, MediaKind, MediaPayload};
use crate::stats::Stats;

/// Outcome of one pipeline run. `None` from [`Pipeline::process`] means the
/// message was not acted on at all (not view-once, owner-skipped, or
/// unsupported) — the expected common case, not an error.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub success: bool,
    pub kind: MediaKind,
    pub saved_path: Option<PathBuf>,
    pub forwarded: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct Pipeline {
    client: Arc<dyn ChatClient>,
    config: ConfigHandle,
    stats: Arc<Stats>,
    transcoder: Transcoder,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn ChatClient>,
        config: ConfigHandle,
        stats: Arc<Stats>,
        transcoder: Transcoder,
    ) -> Self {
        Self {
            client,
            config,
            stats,
            transcoder,
        }
    }

    /// Automatic processing of one inbound envelope.
    pub async fn process(
        &self,
        envelope: &InboundEnvelope,
        is_owner: bool,
    ) -> Option<PipelineResult> {
        let cfg = self.config.handler();

        if !envelope::is_view_once(envelope) {
            return None;
        }

        if is_owner && cfg.skip_owner {
            debug!(chat_id = %envelope.chat_id, "skipping owner's view-once message");
            return None;
        }

        let Some(descriptor) = envelope::extract(envelope) else {
            debug!(chat_id = %envelope.chat_id, "view-once envelope without supported media");
            return None;
        };

        Some(self.run(&envelope.chat_id, descriptor, &cfg).await)
    }

    /// Manual reveal of a quoted message. Runs the same stages over the
    /// quoted content but never applies the owner filter: an explicit
    /// request overrides the skip-owner policy.
    pub async fn reveal(&self, envelope: &InboundEnvelope) -> Option<PipelineResult> {
        let quoted = envelope.quoted.as_ref()?;
        let descriptor = envelope::extract_content(quoted)?;
        let cfg = self.config.handler();
        Some(self.run(&envelope.chat_id, descriptor, &cfg).await)
    }

    async fn run(
        &self,
        chat_id: &str,
        descriptor: ViewOnceDescriptor<'_>,
        cfg: &HandlerConfig,
    ) -> PipelineResult {
        let kind = descriptor.kind;

        // Download — the only stage whose failure aborts the run.
        let bytes = match self.client.download_media(&descriptor.node.media_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(chat_id, %kind, "media download failed: {e}");
                self.stats.record_error();
                return PipelineResult {
                    success: false,
                    kind,
                    saved_path: None,
                    forwarded: false,
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                };
            }
        };

        let mut payload = MediaPayload {
            kind,
            bytes,
            mime_type: descriptor.mime_type.clone(),
            caption: descriptor.caption.clone(),
            suggested_filename: media::generate_filename(kind, &descriptor.mime_type),
        };

        // Conditional transcode: Ogg audio only. Failure degrades to the
        // original bytes instead of aborting.
        if kind == MediaKind::Audio && Transcoder::is_eligible(&payload.mime_type) {
            match self
                .transcoder
                .transcode(&payload.bytes, &payload.mime_type)
                .await
            {
                Ok(converted) => {
                    payload.bytes = converted;
                    payload.mime_type = "audio/mpeg".to_string();
                    payload.suggested_filename =
                        media::generate_filename(MediaKind::Audio, "audio/mpeg");
                }
                Err(e) => {
                    warn!(chat_id, "audio transcode failed, keeping original bytes: {e}");
                }
            }
        }

        // Conditional persist: failure leaves saved_path unset and continues.
        let saved_path = match store::save(cfg, &payload, chat_id) {
            Ok(path) => {
                if path.is_some() {
                    self.stats.record_saved();
                }
                path
            }
            Err(e) => {
                warn!(chat_id, "failed to persist media: {e}");
                None
            }
        };

        // Conditional forward: failures are contained inside.
        let forwarded =
            forward::forward(self.client.as_ref(), chat_id, &payload, cfg, &self.stats).await;
        if forwarded {
            self.stats.record_forwarded();
        }

        self.stats.record_processed();
        if cfg.log_activity {
            info!(
                chat_id,
                %kind,
                saved = saved_path.is_some(),
                forwarded,
                "processed view-once message"
            );
        }

        PipelineResult {
            success: true,
            kind,
            saved_path,
            forwarded,
            error: None,
            timestamp: Utc::now(),
        }
    }
}
