pub mod store;
pub mod transcode;

use serde::{Deserialize, Serialize};

/// Supported media kinds, in classification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn default_mime(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
            Self::Audio => "audio/ogg",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downloaded (and possibly transcoded) media, owned by one pipeline run.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub caption: String,
    pub suggested_filename: String,
}

/// Build a filename for a downloaded payload: millisecond timestamp plus a
/// short random suffix to keep two runs in the same millisecond apart, then
/// the kind and a MIME-derived extension.
pub fn generate_filename(kind: MediaKind, mime_type: &str) -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let salt = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{ts}_{}_{kind}.{}",
        &salt[..8],
        extension_for(kind, mime_type)
    )
}

/// Fixed MIME → extension table; unknown types fall back to the kind name.
fn extension_for(kind: MediaKind, mime_type: &str) -> &'static str {
    // Strip codec parameters ("audio/ogg; codecs=opus").
    let base = mime_type.split(';').next().unwrap_or("").trim();
    match base {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "audio/mp4" => "mp3",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        _ => kind.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert!(generate_filename(MediaKind::Image, "image/png").ends_with(".png"));
        assert!(generate_filename(MediaKind::Image, "image/jpeg").ends_with(".jpg"));
        assert!(generate_filename(MediaKind::Image, "image/webp").ends_with(".webp"));
        assert!(generate_filename(MediaKind::Video, "video/mp4").ends_with(".mp4"));
        assert!(generate_filename(MediaKind::Video, "video/3gpp").ends_with(".3gp"));
        assert!(generate_filename(MediaKind::Audio, "audio/mp4").ends_with(".mp3"));
        assert!(generate_filename(MediaKind::Audio, "audio/mpeg").ends_with(".mp3"));
    }

    #[test]
    fn test_ogg_with_codec_params() {
        assert!(generate_filename(MediaKind::Audio, "audio/ogg; codecs=opus").ends_with(".ogg"));
    }

    #[test]
    fn test_unknown_mime_falls_back_to_kind() {
        assert!(generate_filename(MediaKind::Video, "unknown/type").ends_with(".video"));
        assert!(generate_filename(MediaKind::Image, "").ends_with(".image"));
    }

    #[test]
    fn test_filenames_are_distinct() {
        let a = generate_filename(MediaKind::Image, "image/png");
        let b = generate_filename(MediaKind::Image, "image/png");
        assert_ne!(a, b);
    }
}
