use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelTimeouts;

const DEFAULT_ACTIVE_SECS: u64 = 30;
const DEFAULT_ARCHIVED_SECS: u64 = 30;

/// Console settings, loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Base URL of the recording API, e.g. `https://host:8181`.
    pub authority: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

/// API credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
    /// Authorization scheme, e.g. `Bearer` or `Basic`.
    pub method: Option<String>,
}

/// Refresh intervals in seconds. Zero disables polling for that list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_active_secs")]
    pub active_secs: u64,
    #[serde(default = "default_archived_secs")]
    pub archived_secs: u64,
    #[serde(default)]
    pub templates_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_secs: DEFAULT_ACTIVE_SECS,
            archived_secs: DEFAULT_ARCHIVED_SECS,
            templates_secs: 0,
        }
    }
}

fn default_active_secs() -> u64 {
    DEFAULT_ACTIVE_SECS
}

fn default_archived_secs() -> u64 {
    DEFAULT_ARCHIVED_SECS
}

impl PollingConfig {
    pub fn active(&self) -> Option<Duration> {
        interval(self.active_secs)
    }

    pub fn archived(&self) -> Option<Duration> {
        interval(self.archived_secs)
    }

    pub fn templates(&self) -> Option<Duration> {
        interval(self.templates_secs)
    }
}

fn interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Command channel and re-authentication limits. Unset values use the
/// built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub ready_timeout_secs: Option<u64>,
    pub reply_timeout_secs: Option<u64>,
    pub auth_timeout_secs: Option<u64>,
}

impl ChannelConfig {
    pub fn timeouts(&self) -> ChannelTimeouts {
        let defaults = ChannelTimeouts::default();
        ChannelTimeouts {
            ready: self.ready_timeout_secs.map_or(defaults.ready, Duration::from_secs),
            reply: self.reply_timeout_secs.map_or(defaults.reply, Duration::from_secs),
            auth: self.auth_timeout_secs.map_or(defaults.auth, Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Where downloaded recordings, reports and templates are written.
    /// Defaults to the current directory.
    pub directory: Option<PathBuf>,
}

impl ConsoleConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// `<config dir>/jfrctl/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("jfrctl").join("config.toml"))
}

/// Errors that can occur when loading or saving config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    WriteFailed(PathBuf, std::io::Error),
    SerializeFailed(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::WriteFailed(path, e) => {
                write!(f, "Failed to write config {}: {}", path.display(), e)
            }
            Self::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Warn if a config file is world-readable; it may hold an API token.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             It may contain tokens -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
