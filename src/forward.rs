//! Conditional re-delivery of recovered payloads.
//!
//! Never propagates transport failures: a failed send is logged, counted
//! in the error statistic, and reported as `false`.

use tracing::{debug, error, info};

use crate::channels::{ChatClient, SendContent};
use crate::config::HandlerConfig;
use crate::media::{MediaKind, MediaPayload};
use crate::stats::Stats;

pub const DEFAULT_CAPTION: &str = "Recovered view-once media";
const DEFAULT_AUDIO_MIME: &str = "audio/mpeg";

/// Send a recovered payload back into a conversation, honoring the
/// auto-forward flag and the per-chat-kind enable flags. Returns whether
/// the send actually completed.
pub async fn forward(
    client: &dyn ChatClient,
    chat_id: &str,
    payload: &MediaPayload,
    cfg: &HandlerConfig,
    stats: &Stats,
) -> bool {
    if !cfg.auto_forward {
        return false;
    }

    let is_group = chat_id.ends_with("@g.us");
    if is_group && !cfg.enable_in_groups {
        debug!(chat_id, "forwarding disabled for group chats");
        return false;
    }
    if !is_group && !cfg.enable_in_private {
        debug!(chat_id, "forwarding disabled for private chats");
        return false;
    }

    match client.send(chat_id, build_content(payload)).await {
        Ok(()) => {
            if cfg.log_activity {
                info!(chat_id, kind = %payload.kind, "forwarded recovered media");
            }
            true
        }
        Err(e) => {
            error!(chat_id, kind = %payload.kind, "failed to forward media: {e}");
            stats.record_error();
            false
        }
    }
}

fn build_content(payload: &MediaPayload) -> SendContent {
    let caption = if payload.caption.is_empty() {
        DEFAULT_CAPTION.to_string()
    } else {
        payload.caption.clone()
    };

    match payload.kind {
        MediaKind::Image => SendContent::Image {
            bytes: payload.bytes.clone(),
            caption,
        },
        MediaKind::Video => SendContent::Video {
            bytes: payload.bytes.clone(),
            caption,
        },
        MediaKind::Audio => SendContent::Audio {
            bytes: payload.bytes.clone(),
            mime_type: if payload.mime_type.is_empty() {
                DEFAULT_AUDIO_MIME.to_string()
            } else {
                payload.mime_type.clone()
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KiokuError, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockClient {
        sent: Mutex<Vec<(String, SendContent)>>,
        fail_send: bool,
    }

    #[async_trait]
    impl ChatClient for MockClient {
        async fn download_media(&self, _media_ref: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn send(&self, chat_id: &str, content: SendContent) -> Result<()> {
            if self.fail_send {
                return Err(KiokuError::Channel("transport down".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), content));
            Ok(())
        }
    }

    fn payload(kind: MediaKind, mime: &str, caption: &str) -> MediaPayload {
        MediaPayload {
            kind,
            bytes: vec![1, 2, 3],
            mime_type: mime.to_string(),
            caption: caption.to_string(),
            suggested_filename: "f".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disabled_auto_forward_is_noop() {
        let client = MockClient::default();
        let cfg = HandlerConfig {
            auto_forward: false,
            ..Default::default()
        };
        let stats = Stats::new();
        let sent = forward(
            &client,
            "1@s.whatsapp.net",
            &payload(MediaKind::Image, "image/jpeg", ""),
            &cfg,
            &stats,
        )
        .await;
        assert!(!sent);
        assert!(client.sent.lock().unwrap().is_empty());
        assert_eq!(stats.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn test_group_flag_gates_group_chats() {
        let client = MockClient::default();
        let cfg = HandlerConfig {
            enable_in_groups: false,
            ..Default::default()
        };
        let stats = Stats::new();
        assert!(
            !forward(
                &client,
                "123@g.us",
                &payload(MediaKind::Image, "image/jpeg", ""),
                &cfg,
                &stats,
            )
            .await
        );
        // Private chats are still allowed.
        assert!(
            forward(
                &client,
                "1@s.whatsapp.net",
                &payload(MediaKind::Image, "image/jpeg", ""),
                &cfg,
                &stats,
            )
            .await
        );
    }

    #[tokio::test]
    async fn test_default_caption_applied() {
        let client = MockClient::default();
        let cfg = HandlerConfig::default();
        let stats = Stats::new();
        forward(
            &client,
            "1@s.whatsapp.net",
            &payload(MediaKind::Image, "image/jpeg", ""),
            &cfg,
            &stats,
        )
        .await;

        let sent = client.sent.lock().unwrap();
        match &sent[0].1 {
            SendContent::Image { caption, .. } => assert_eq!(caption, DEFAULT_CAPTION),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_audio_carries_mime_type() {
        let client = MockClient::default();
        let cfg = HandlerConfig::default();
        let stats = Stats::new();
        forward(
            &client,
            "1@s.whatsapp.net",
            &payload(MediaKind::Audio, "audio/ogg; codecs=opus", ""),
            &cfg,
            &stats,
        )
        .await;

        let sent = client.sent.lock().unwrap();
        match &sent[0].1 {
            SendContent::Audio { mime_type, .. } => {
                assert_eq!(mime_type, "audio/ogg; codecs=opus")
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_failure_counts_error_and_returns_false() {
        let client = MockClient {
            fail_send: true,
            ..Default::default()
        };
        let cfg = HandlerConfig::default();
        let stats = Stats::new();
        let sent = forward(
            &client,
            "1@s.whatsapp.net",
            &payload(MediaKind::Video, "video/mp4", "cap"),
            &cfg,
            &stats,
        )
        .await;
        assert!(!sent);
        assert_eq!(stats.snapshot().errors, 1);
    }
}
