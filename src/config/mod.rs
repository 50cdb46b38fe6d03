use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KiokuError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:3700".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_token: None,
        }
    }
}

/// Transport sidecar connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Directory containing the sidecar's package.json. Auto-discovered if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_dir: Option<String>,
    #[serde(default = "default_sidecar_port")]
    pub sidecar_port: u16,
    /// Chat identity of the bot owner; compared against envelope senders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

fn default_sidecar_port() -> u16 {
    3721
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: None,
            sidecar_port: default_sidecar_port(),
            owner_id: None,
        }
    }
}

/// Per-message handler flags. Every pipeline run reads one consistent
/// snapshot of this struct; runtime toggles swap the shared copy whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(default = "default_true")]
    pub auto_forward: bool,
    #[serde(default = "default_true")]
    pub save_to_temp: bool,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    #[serde(default = "default_true")]
    pub enable_in_groups: bool,
    #[serde(default = "default_true")]
    pub enable_in_private: bool,
    #[serde(default = "default_true")]
    pub log_activity: bool,
    #[serde(default)]
    pub skip_owner: bool,
    #[serde(default = "default_max_temp_age_hours")]
    pub max_temp_age_hours: u64,
}

fn default_true() -> bool {
    true
}

fn default_temp_dir() -> String {
    "~/.kioku/media".to_string()
}

fn default_max_temp_age_hours() -> u64 {
    24
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            auto_forward: true,
            save_to_temp: true,
            temp_dir: default_temp_dir(),
            enable_in_groups: true,
            enable_in_private: true,
            log_activity: true,
            skip_owner: false,
            max_temp_age_hours: default_max_temp_age_hours(),
        }
    }
}

impl HandlerConfig {
    pub fn temp_dir_path(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.temp_dir))
    }

    pub fn max_temp_age(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.max_temp_age_hours * 3600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval_hours: u64,
}

fn default_cleanup_interval() -> u64 {
    6
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    #[serde(default = "default_codec_cmd")]
    pub codec_cmd: String,
    #[serde(default = "default_codec_timeout")]
    pub timeout_secs: u64,
}

fn default_codec_cmd() -> String {
    "ffmpeg".to_string()
}

fn default_codec_timeout() -> u64 {
    60
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            codec_cmd: default_codec_cmd(),
            timeout_secs: default_codec_timeout(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KiokuError::Config(format!("Failed to read config: {e}")))?;
        let content = substitute_env_vars(&content);
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KiokuError::Config(format!("Failed to serialize config: {e}")))?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        kioku_dir().join("config.toml")
    }

    pub fn default_toml() -> &'static str {
        r#"[gateway]
bind = "127.0.0.1:3700"
# api_token = "${KIOKU_API_TOKEN}"

[channel]
sidecar_port = 3721
# sidecar_dir = "/path/to/sidecar"
# owner_id = "15551234567@s.whatsapp.net"

[handler]
auto_forward = true
save_to_temp = true
temp_dir = "~/.kioku/media"
enable_in_groups = true
enable_in_private = true
log_activity = true
skip_owner = false
max_temp_age_hours = 24

[cleanup]
interval_hours = 6

[transcode]
codec_cmd = "ffmpeg"
timeout_secs = 60
"#
    }
}

pub fn kioku_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kioku")
}

fn expand_home(path: &str) -> String {
    path.replace(
        '~',
        &dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .to_string_lossy(),
    )
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
pub fn substitute_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Runtime handle
// ---------------------------------------------------------------------------

/// Shared configuration handle. In-flight pipeline runs read whole snapshots;
/// administrative updates replace the shared copy and persist it to disk.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Consistent copy of the handler flags for one pipeline run.
    pub fn handler(&self) -> HandlerConfig {
        self.inner
            .read()
            .map(|c| c.handler.clone())
            .unwrap_or_default()
    }

    pub fn config(&self) -> Config {
        self.inner.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Apply an update to the handler flags and persist the full config.
    pub fn update_handler(&self, f: impl FnOnce(&mut HandlerConfig)) -> Result<HandlerConfig> {
        let updated = {
            let mut guard = self
                .inner
                .write()
                .map_err(|_| KiokuError::Config("config lock poisoned".to_string()))?;
            f(&mut guard.handler);
            guard.clone()
        };
        if let Some(path) = &self.path {
            updated.save(path)?;
        }
        Ok(updated.handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(Config::default_toml()).unwrap();
        assert_eq!(config.gateway.bind, "127.0.0.1:3700");
        assert!(config.handler.auto_forward);
        assert_eq!(config.handler.max_temp_age_hours, 24);
        assert_eq!(config.transcode.codec_cmd, "ffmpeg");
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.channel.sidecar_port, 3721);
        assert!(config.handler.save_to_temp);
        assert_eq!(config.cleanup.interval_hours, 6);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("KIOKU_TEST_VAR", "hello123");
        let result = substitute_env_vars("key = \"${KIOKU_TEST_VAR}\"");
        assert_eq!(result, "key = \"hello123\"");
        std::env::remove_var("KIOKU_TEST_VAR");
    }

    #[test]
    fn test_missing_env_var_becomes_empty() {
        let result = substitute_env_vars("key = \"${NONEXISTENT_VAR_XYZ}\"");
        assert_eq!(result, "key = \"\"");
    }

    #[test]
    fn test_handle_snapshot_and_update() {
        let handle = ConfigHandle::new(Config::default(), None);
        assert!(handle.handler().auto_forward);

        let updated = handle.update_handler(|h| h.auto_forward = false).unwrap();
        assert!(!updated.auto_forward);
        assert!(!handle.handler().auto_forward);
    }

    #[test]
    fn test_update_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let handle = ConfigHandle::new(Config::default(), Some(path.clone()));

        handle.update_handler(|h| h.skip_owner = true).unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert!(reloaded.handler.skip_owner);
    }
}
