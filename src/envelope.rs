//! Inbound message model and view-once detection.
//!
//! The transport exposes view-once status through several incompatible
//! encodings: a dedicated wrapper node, a versioned wrapper node, an
//! extension wrapper node, or a `viewOnce` flag set directly on a media
//! node. Detection resolves whichever variant is present exactly once;
//! extraction then matches on that variant instead of probing fields again.

use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

/// One message as delivered by the transport sidecar. Borrowed by the
/// pipeline for the duration of a single run, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub message_id: String,
    /// Transport-side send time, unix seconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub content: MessageContent,
    /// Content of the message this one replies to, when present.
    #[serde(default)]
    pub quoted: Option<MessageContent>,
}

impl InboundEnvelope {
    /// Group chats carry the `@g.us` address suffix; everything else is
    /// treated as a one-to-one conversation.
    pub fn is_group(&self) -> bool {
        self.chat_id.ends_with("@g.us")
    }

    pub fn text(&self) -> Option<&str> {
        self.content.text.as_deref()
    }
}

/// The transport's nested content union. Exactly the fields the pipeline
/// cares about; unknown fields are ignored during deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Original view-once wrapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_once: Option<Box<MessageContent>>,
    /// Versioned view-once wrapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_once_v2: Option<Box<MessageContent>>,
    /// Extension view-once wrapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_once_v2_extension: Option<Box<MessageContent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaNode>,
}

/// An embedded media reference before its bytes are fetched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaNode {
    /// Opaque download handle understood by the chat client.
    pub media_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// View-once flag attached directly to the media node.
    #[serde(default)]
    pub view_once: bool,
}

/// The view-once encoding actually present in a message, resolved once at
/// detection time.
#[derive(Debug, Clone, Copy)]
pub enum ViewOnceVariant<'a> {
    WrapperV1(&'a MessageContent),
    WrapperV2(&'a MessageContent),
    ExtensionWrapper(&'a MessageContent),
    /// `viewOnce = true` directly on a media node; the outer content holds
    /// the media itself.
    DirectFlag(&'a MessageContent),
}

impl<'a> ViewOnceVariant<'a> {
    /// The content node that carries the actual media.
    fn inner(self) -> &'a MessageContent {
        match self {
            Self::WrapperV1(c) | Self::WrapperV2(c) | Self::ExtensionWrapper(c) => c,
            Self::DirectFlag(c) => c,
        }
    }
}

/// Resolve which view-once encoding a content union uses, if any.
/// Wrapper nodes are checked before the direct flag.
pub fn resolve_variant(content: &MessageContent) -> Option<ViewOnceVariant<'_>> {
    if let Some(inner) = &content.view_once {
        return Some(ViewOnceVariant::WrapperV1(inner));
    }
    if let Some(inner) = &content.view_once_v2 {
        return Some(ViewOnceVariant::WrapperV2(inner));
    }
    if let Some(inner) = &content.view_once_v2_extension {
        return Some(ViewOnceVariant::ExtensionWrapper(inner));
    }

    let direct = [&content.image, &content.video, &content.audio]
        .into_iter()
        .flatten()
        .any(|node| node.view_once);
    if direct {
        return Some(ViewOnceVariant::DirectFlag(content));
    }

    None
}

pub fn is_view_once(envelope: &InboundEnvelope) -> bool {
    resolve_variant(&envelope.content).is_some()
}

/// The classified media reference produced by extraction.
#[derive(Debug, Clone)]
pub struct ViewOnceDescriptor<'a> {
    pub kind: MediaKind,
    pub node: &'a MediaNode,
    pub caption: String,
    pub mime_type: String,
}

/// Extract the embedded media descriptor from a view-once envelope.
/// Pure: no I/O, deterministic for the same input. Returns `None` for
/// non-view-once content and for unsupported media kinds.
pub fn extract(envelope: &InboundEnvelope) -> Option<ViewOnceDescriptor<'_>> {
    extract_content(&envelope.content)
}

/// Same as [`extract`] but over a bare content union (used for the manual
/// reveal path, which operates on quoted content).
pub fn extract_content(content: &MessageContent) -> Option<ViewOnceDescriptor<'_>> {
    let variant = resolve_variant(content)?;
    let inner = variant.inner();

    // Fixed classification order; first supported kind wins.
    let candidates = [
        (MediaKind::Image, &inner.image),
        (MediaKind::Video, &inner.video),
        (MediaKind::Audio, &inner.audio),
    ];

    for (kind, slot) in candidates {
        if let Some(node) = slot {
            let mime_type = node
                .mime_type
                .clone()
                .unwrap_or_else(|| kind.default_mime().to_string());
            let caption = node.caption.clone().unwrap_or_default();
            return Some(ViewOnceDescriptor {
                kind,
                node,
                caption,
                mime_type,
            });
        }
    }

    None
}
