//! Inbound event routing.
//!
//! Everything that is not a `.vo` command goes through the automatic
//! pipeline; commands are thin handlers that format pipeline and stats
//! output back into the requesting conversation. When an owner is
//! configured, commands from anyone else are dropped silently.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::channels::{ChatClient, SendContent};
use crate::config::ConfigHandle;
use crate::envelope::InboundEnvelope;
use crate::media::store;
use crate::pipeline::{Pipeline, PipelineResult};
use crate::stats::Stats;

pub struct Gateway {
    pipeline: Arc<Pipeline>,
    client: Arc<dyn ChatClient>,
    config: ConfigHandle,
    stats: Arc<Stats>,
    owner_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reveal,
    AutoForward(bool),
    Groups(bool),
    Private(bool),
    Stats,
    Cleanup(Option<u64>),
}

impl Gateway {
    pub fn new(
        pipeline: Arc<Pipeline>,
        client: Arc<dyn ChatClient>,
        config: ConfigHandle,
        stats: Arc<Stats>,
        owner_id: Option<String>,
    ) -> Self {
        Self {
            pipeline,
            client,
            config,
            stats,
            owner_id,
        }
    }

    pub async fn handle_envelope(&self, envelope: InboundEnvelope) {
        let is_owner = self
            .owner_id
            .as_deref()
            .is_some_and(|owner| owner == envelope.sender_id);

        if let Some(command) = envelope.text().and_then(parse_command) {
            // Owner-only once an owner is configured; without one the
            // install is treated as single-user.
            if is_owner || self.owner_id.is_none() {
                self.handle_command(&envelope, command).await;
            } else {
                debug!(sender_id = %envelope.sender_id, "ignoring command from non-owner");
            }
            return;
        }

        // Automatic failures stay out of the conversation; the pipeline
        // logs and records them itself.
        let _ = self.pipeline.process(&envelope, is_owner).await;
    }

    async fn handle_command(&self, envelope: &InboundEnvelope, command: Command) {
        let reply = match command {
            Command::Reveal => match self.pipeline.reveal(envelope).await {
                Some(result) => render_reveal(&result),
                None => "Reply to a view-once message with .vo to reveal it.".to_string(),
            },
            Command::AutoForward(on) => self.toggle(|h| h.auto_forward = on, "auto-forward", on),
            Command::Groups(on) => self.toggle(|h| h.enable_in_groups = on, "group chats", on),
            Command::Private(on) => self.toggle(|h| h.enable_in_private = on, "private chats", on),
            Command::Stats => self.stats.snapshot().render(),
            Command::Cleanup(hours) => self.cleanup(hours),
        };

        if let Err(e) = self
            .client
            .send(&envelope.chat_id, SendContent::Text(reply))
            .await
        {
            error!(chat_id = %envelope.chat_id, "failed to send command reply: {e}");
        }
    }

    fn toggle(
        &self,
        f: impl FnOnce(&mut crate::config::HandlerConfig),
        label: &str,
        on: bool,
    ) -> String {
        match self.config.update_handler(f) {
            Ok(_) => format!(
                "View-once {label} {}.",
                if on { "enabled" } else { "disabled" }
            ),
            Err(e) => {
                warn!("failed to update config: {e}");
                format!("Failed to update config: {e}")
            }
        }
    }

    fn cleanup(&self, hours: Option<u64>) -> String {
        let cfg = self.config.handler();
        let max_age = hours
            .map(|h| std::time::Duration::from_secs(h * 3600))
            .unwrap_or_else(|| cfg.max_temp_age());

        match store::evict(&cfg.temp_dir_path(), max_age) {
            Ok(removed) => format!("Cleanup done: removed {removed} stale artifact(s)."),
            Err(e) => format!("Cleanup failed: {e}"),
        }
    }
}

fn render_reveal(result: &PipelineResult) -> String {
    if !result.success {
        return format!(
            "Could not recover the media: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    let mut parts = vec![format!("Recovered view-once {}", result.kind)];
    if let Some(path) = &result.saved_path {
        parts.push(format!("saved to {}", path.display()));
    }
    if result.forwarded {
        parts.push("forwarded".to_string());
    }
    format!("{}.", parts.join(", "))
}

fn parse_command(text: &str) -> Option<Command> {
    let mut words = text.trim().split_whitespace();
    if words.next()? != ".vo" {
        return None;
    }

    match words.next() {
        None => Some(Command::Reveal),
        Some("on") => Some(Command::AutoForward(true)),
        Some("off") => Some(Command::AutoForward(false)),
        Some("groups") => match words.next()? {
            "on" => Some(Command::Groups(true)),
            "off" => Some(Command::Groups(false)),
            _ => None,
        },
        Some("private") => match words.next()? {
            "on" => Some(Command::Private(true)),
            "off" => Some(Command::Private(false)),
            _ => None,
        },
        Some("stats") => Some(Command::Stats),
        Some("cleanup") => {
            let hours = words.next().and_then(|w| w.parse().ok());
            Some(Command::Cleanup(hours))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Result;
    use crate::media::transcode::Transcoder;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockClient {
        sent: Mutex<Vec<(String, SendContent)>>,
    }

    #[async_trait]
    impl ChatClient for MockClient {
        async fn download_media(&self, _media_ref: &str) -> Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }

        async fn send(&self, chat_id: &str, content: SendContent) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), content));
            Ok(())
        }
    }

    fn gateway() -> (Gateway, Arc<MockClient>, ConfigHandle) {
        let client = Arc::new(MockClient::default());
        let mut config = Config::default();
        config.handler.save_to_temp = false;
        let handle = ConfigHandle::new(config, None);
        let stats = Arc::new(Stats::new());
        let pipeline = Arc::new(Pipeline::new(
            client.clone(),
            handle.clone(),
            stats.clone(),
            Transcoder::with_command("ffmpeg", Duration::from_secs(5)),
        ));
        let gw = Gateway::new(
            pipeline,
            client.clone(),
            handle.clone(),
            stats,
            Some("owner@s.whatsapp.net".to_string()),
        );
        (gw, client, handle)
    }

    fn text_envelope(text: &str) -> InboundEnvelope {
        InboundEnvelope {
            chat_id: "1@s.whatsapp.net".to_string(),
            sender_id: "owner@s.whatsapp.net".to_string(),
            message_id: "m".to_string(),
            timestamp: 0,
            content: crate::envelope::MessageContent {
                text: Some(text.to_string()),
                ..Default::default()
            },
            quoted: None,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command(".vo"), Some(Command::Reveal));
        assert_eq!(parse_command(" .vo "), Some(Command::Reveal));
        assert_eq!(parse_command(".vo on"), Some(Command::AutoForward(true)));
        assert_eq!(parse_command(".vo off"), Some(Command::AutoForward(false)));
        assert_eq!(parse_command(".vo groups off"), Some(Command::Groups(false)));
        assert_eq!(parse_command(".vo private on"), Some(Command::Private(true)));
        assert_eq!(parse_command(".vo stats"), Some(Command::Stats));
        assert_eq!(parse_command(".vo cleanup"), Some(Command::Cleanup(None)));
        assert_eq!(parse_command(".vo cleanup 12"), Some(Command::Cleanup(Some(12))));
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command(".vo bogus"), None);
        assert_eq!(parse_command(".vo groups maybe"), None);
    }

    #[tokio::test]
    async fn test_toggle_command_updates_config_and_replies() {
        let (gw, client, handle) = gateway();
        gw.handle_envelope(text_envelope(".vo off")).await;

        assert!(!handle.handler().auto_forward);
        let sent = client.sent.lock().unwrap();
        match &sent[0].1 {
            SendContent::Text(text) => assert!(text.contains("disabled")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commands_ignored_from_non_owner() {
        let (gw, client, handle) = gateway();
        let mut env = text_envelope(".vo off");
        env.sender_id = "stranger@s.whatsapp.net".to_string();
        gw.handle_envelope(env).await;

        // Config untouched, no reply sent.
        assert!(handle.handler().auto_forward);
        assert!(client.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commands_allowed_without_configured_owner() {
        let (_, client, handle) = gateway();
        let stats = Arc::new(Stats::new());
        let pipeline = Arc::new(Pipeline::new(
            client.clone(),
            handle.clone(),
            stats.clone(),
            Transcoder::with_command("ffmpeg", Duration::from_secs(5)),
        ));
        let gw = Gateway::new(pipeline, client.clone(), handle.clone(), stats, None);

        let mut env = text_envelope(".vo off");
        env.sender_id = "anyone@s.whatsapp.net".to_string();
        gw.handle_envelope(env).await;

        assert!(!handle.handler().auto_forward);
    }

    #[tokio::test]
    async fn test_stats_command_replies_with_counters() {
        let (gw, client, _) = gateway();
        gw.handle_envelope(text_envelope(".vo stats")).await;

        let sent = client.sent.lock().unwrap();
        match &sent[0].1 {
            SendContent::Text(text) => assert!(text.contains("Processed: 0")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reveal_without_quote_gets_usage_hint() {
        let (gw, client, _) = gateway();
        gw.handle_envelope(text_envelope(".vo")).await;

        let sent = client.sent.lock().unwrap();
        match &sent[0].1 {
            SendContent::Text(text) => assert!(text.contains("Reply to a view-once")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reveal_reports_recovery() {
        let (gw, client, _) = gateway();
        let mut env = text_envelope(".vo");
        env.quoted = Some(crate::envelope::MessageContent {
            view_once_v2: Some(Box::new(crate::envelope::MessageContent {
                image: Some(crate::envelope::MediaNode {
                    media_ref: "enc:x".to_string(),
                    mime_type: Some("image/jpeg".to_string()),
                    caption: None,
                    view_once: false,
                }),
                ..Default::default()
            })),
            ..Default::default()
        });
        gw.handle_envelope(env).await;

        let sent = client.sent.lock().unwrap();
        // Forward of the recovered image, then the confirmation text.
        assert!(sent
            .iter()
            .any(|(_, c)| matches!(c, SendContent::Image { .. })));
        assert!(sent.iter().any(|(_, c)| matches!(
            c,
            SendContent::Text(t) if t.contains("Recovered view-once image")
        )));
    }
}
