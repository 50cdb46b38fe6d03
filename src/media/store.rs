//! Temp artifact store: saves recovered payloads and evicts stale ones.
//!
//! The temp directory is shared between all pipeline runs and the cleanup
//! scheduler. Eviction is best-effort: a file that disappears between the
//! directory listing and the delete call is treated as already gone.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::HandlerConfig;
use crate::error::{KiokuError, Result};
use crate::media::MediaPayload;

/// Prefix for every artifact this store owns. Eviction never touches
/// files without it, so the directory can be shared with other tools.
pub const ARTIFACT_PREFIX: &str = "viewonce_";

/// Replace non-alphanumeric characters so a conversation id is safe in a
/// filename.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Persist a payload under the configured temp directory. No-op returning
/// `Ok(None)` unless `save_to_temp` is enabled.
pub fn save(
    cfg: &HandlerConfig,
    payload: &MediaPayload,
    chat_id: &str,
) -> Result<Option<PathBuf>> {
    if !cfg.save_to_temp {
        return Ok(None);
    }

    let dir = cfg.temp_dir_path();
    std::fs::create_dir_all(&dir)
        .map_err(|e| KiokuError::Persist(format!("create {}: {e}", dir.display())))?;

    let name = format!(
        "{ARTIFACT_PREFIX}{}_{}_{}",
        sanitize_id(chat_id),
        chrono::Utc::now().timestamp(),
        payload.suggested_filename
    );
    let path = dir.join(name);

    std::fs::write(&path, &payload.bytes)
        .map_err(|e| KiokuError::Persist(format!("write {}: {e}", path.display())))?;

    debug!(path = %path.display(), len = payload.bytes.len(), "saved media artifact");
    Ok(Some(path))
}

/// Remove artifacts older than `max_age`. Returns how many were removed.
/// A missing directory is a no-op; individual removal failures are logged
/// and skipped without aborting the sweep.
pub fn evict(dir: &Path, max_age: Duration) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else {
            continue;
        };
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(ARTIFACT_PREFIX) {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let age = modified.elapsed().unwrap_or_default();
        if age < max_age {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "evicted stale artifact");
                removed += 1;
            }
            // The file may have been removed by a concurrent sweep.
            Err(e) => debug!(path = %entry.path().display(), "skipping eviction: {e}"),
        }
    }

    if removed > 0 {
        warn!(removed, dir = %dir.display(), "evicted stale media artifacts");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;

    fn payload() -> MediaPayload {
        MediaPayload {
            kind: MediaKind::Image,
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime_type: "image/jpeg".to_string(),
            caption: String::new(),
            suggested_filename: "123_abcd_image.jpg".to_string(),
        }
    }

    fn cfg(dir: &Path, enabled: bool) -> HandlerConfig {
        HandlerConfig {
            save_to_temp: enabled,
            temp_dir: dir.to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_save_disabled_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let result = save(&cfg(dir.path(), false), &payload(), "123@g.us").unwrap();
        assert!(result.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_save_writes_prefixed_sanitized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = save(&cfg(dir.path(), true), &payload(), "123-456@g.us")
            .unwrap()
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("viewonce_123_456_g_us_"));
        assert!(name.ends_with(".jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let path = save(&cfg(&nested, true), &payload(), "x").unwrap().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_evict_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(evict(&missing, Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_evict_only_prefixed_and_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefixed = dir.path().join("viewonce_abc_1_x.jpg");
        let unrelated = dir.path().join("keepme.txt");
        std::fs::write(&prefixed, b"a").unwrap();
        std::fs::write(&unrelated, b"b").unwrap();

        // max_age = 0: every prefixed file qualifies, unrelated stays.
        let removed = evict(dir.path(), Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
        assert!(!prefixed.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_evict_keeps_young_files() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("viewonce_abc_1_x.jpg");
        std::fs::write(&fresh, b"a").unwrap();

        let removed = evict(dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(fresh.exists());
    }
}
