pub mod sidecar;

use async_trait::async_trait;

use crate::error::Result;

/// Transport-level send payload, keyed by media kind.
#[derive(Debug, Clone)]
pub enum SendContent {
    Image { bytes: Vec<u8>, caption: String },
    Video { bytes: Vec<u8>, caption: String },
    Audio { bytes: Vec<u8>, mime_type: String },
    Text(String),
}

/// The external chat-client capability the pipeline consumes. Byte
/// retrieval and delivery are delegated here; wire protocol and auth are
/// the implementation's concern.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Fetch the raw media bytes for an opaque content reference. Fails on
    /// expired or invalid references.
    async fn download_media(&self, media_ref: &str) -> Result<Vec<u8>>;

    /// Deliver content into a conversation. Fails on transport errors.
    async fn send(&self, chat_id: &str, content: SendContent) -> Result<()>;
}
