//! Application configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{double_option, duration_millis, duration_secs};
use crate::error::ConfigError;

/// Default ceiling on peer connections handed to the engine
pub const DEFAULT_MAX_CONNECTIONS: u32 = 150;

/// Default IPC port for CLI/daemon communication (localhost only)
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// Process-wide configuration, loaded once and changed only through
/// explicit saves. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory new sessions download into unless overridden
    pub download_path: PathBuf,

    /// Maximum number of peer connections
    pub max_connections: u32,

    /// Download rate limit in bytes/s (absent = unlimited)
    pub download_limit: Option<u64>,

    /// Upload rate limit in bytes/s (absent = unlimited)
    pub upload_limit: Option<u64>,

    /// Announce completed downloads to the user
    pub notify_on_complete: bool,

    /// Start the daemon at login
    pub auto_launch: bool,

    /// IPC port for CLI communication
    pub ipc_port: u16,

    /// Directory holding persisted sessions and feed history
    pub state_dir: PathBuf,

    /// Quiet period before session state is written
    #[serde(with = "duration_millis")]
    pub persist_debounce: Duration,

    /// Bound on metadata resolution during `inspect`
    #[serde(with = "duration_secs")]
    pub metadata_timeout: Duration,

    /// Watched folder ingestion
    pub watch: WatchConfig,

    /// Feed polling ingestion
    pub feeds: FeedConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_dir(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            download_limit: None,
            upload_limit: None,
            notify_on_complete: true,
            auto_launch: false,
            ipc_port: DEFAULT_IPC_PORT,
            state_dir: super::default_config_dir(),
            persist_debounce: Duration::from_millis(2000),
            metadata_timeout: Duration::from_secs(30),
            watch: WatchConfig::default(),
            feeds: FeedConfig::default(),
        }
    }
}

impl AppConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }
}

/// Default download directory: `~/Downloads/magnetar`
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("magnetar")
}

/// Watched folder settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

impl WatchConfig {
    /// The folder to watch, if watching is enabled and a folder is set
    pub fn active_path(&self) -> Option<&PathBuf> {
        if self.enabled {
            self.path.as_ref().filter(|p| !p.as_os_str().is_empty())
        } else {
            None
        }
    }
}

/// Feed polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub urls: Vec<String>,

    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            poll_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Partial configuration update; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub download_path: Option<PathBuf>,
    pub max_connections: Option<u32>,
    /// `Some(None)` clears the limit
    #[serde(
        deserialize_with = "double_option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub download_limit: Option<Option<u64>>,
    /// `Some(None)` clears the limit
    #[serde(
        deserialize_with = "double_option::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub upload_limit: Option<Option<u64>>,
    pub watch_enabled: Option<bool>,
    pub watch_path: Option<PathBuf>,
    pub feed_urls: Option<Vec<String>>,
    pub feed_poll_interval_secs: Option<u64>,
    pub notify_on_complete: Option<bool>,
    pub auto_launch: Option<bool>,
}

impl ConfigPatch {
    /// Merge this patch into `config`
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(path) = &self.download_path {
            config.download_path = path.clone();
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(limit) = self.download_limit {
            config.download_limit = limit;
        }
        if let Some(limit) = self.upload_limit {
            config.upload_limit = limit;
        }
        if let Some(enabled) = self.watch_enabled {
            config.watch.enabled = enabled;
        }
        if let Some(path) = &self.watch_path {
            config.watch.path = Some(path.clone());
        }
        if let Some(urls) = &self.feed_urls {
            config.feeds.urls = urls.clone();
        }
        if let Some(secs) = self.feed_poll_interval_secs {
            config.feeds.poll_interval = Duration::from_secs(secs);
        }
        if let Some(notify) = self.notify_on_complete {
            config.notify_on_complete = notify;
        }
        if let Some(auto_launch) = self.auto_launch {
            config.auto_launch = auto_launch;
        }
    }

    /// Build a single-field patch from a dotted key and a string value,
    /// as typed on the command line.
    pub fn from_key_value(key: &str, value: &str) -> Result<Self, ConfigError> {
        let mut patch = ConfigPatch::default();
        match key {
            "download_path" => patch.download_path = Some(PathBuf::from(value)),
            "max_connections" => patch.max_connections = Some(parse_number(key, value)?),
            "download_limit" => patch.download_limit = Some(parse_limit(key, value)?),
            "upload_limit" => patch.upload_limit = Some(parse_limit(key, value)?),
            "watch.enabled" => patch.watch_enabled = Some(parse_bool(key, value)?),
            "watch.path" => patch.watch_path = Some(PathBuf::from(value)),
            "feeds.urls" => {
                patch.feed_urls = Some(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(String::from)
                        .collect(),
                )
            }
            "feeds.poll_interval" => {
                patch.feed_poll_interval_secs = Some(parse_number(key, value)?)
            }
            "notify_on_complete" => patch.notify_on_complete = Some(parse_bool(key, value)?),
            "auto_launch" => patch.auto_launch = Some(parse_bool(key, value)?),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(patch)
    }

    /// Whether this patch touches ingestion settings
    pub fn touches_ingestion(&self) -> bool {
        self.watch_enabled.is_some()
            || self.watch_path.is_some()
            || self.feed_urls.is_some()
            || self.feed_poll_interval_secs.is_some()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{} expects true/false, got '{}'",
            key, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} expects a number, got '{}'", key, value)))
}

/// `none`, `unlimited`, `0` or a negative number clear the limit
fn parse_limit(key: &str, value: &str) -> Result<Option<u64>, ConfigError> {
    let lower = value.to_ascii_lowercase();
    if lower == "none" || lower == "unlimited" {
        return Ok(None);
    }
    let limit: i64 = parse_number(key, value)?;
    Ok(if limit <= 0 { None } else { Some(limit as u64) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_merge_with_defaults() {
        let config: AppConfig = toml::from_str("max_connections = 40\n[watch]\nenabled = true\n")
            .unwrap();
        assert_eq!(config.max_connections, 40);
        assert!(config.watch.enabled);
        assert_eq!(config.ipc_port, DEFAULT_IPC_PORT);
        assert_eq!(config.feeds.poll_interval, Duration::from_secs(900));
        assert!(config.notify_on_complete);
    }

    #[test]
    fn test_watch_active_path_requires_enabled() {
        let mut watch = WatchConfig {
            enabled: false,
            path: Some(PathBuf::from("/tmp/in")),
        };
        assert!(watch.active_path().is_none());
        watch.enabled = true;
        assert_eq!(watch.active_path(), Some(&PathBuf::from("/tmp/in")));
        watch.path = Some(PathBuf::new());
        assert!(watch.active_path().is_none());
    }

    #[test]
    fn test_patch_apply_merges_only_set_fields() {
        let mut config = AppConfig {
            download_limit: Some(100),
            ..AppConfig::default()
        };
        let patch = ConfigPatch {
            max_connections: Some(10),
            upload_limit: Some(Some(50)),
            ..ConfigPatch::default()
        };
        patch.apply(&mut config);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.upload_limit, Some(50));
        assert_eq!(config.download_limit, Some(100));
    }

    #[test]
    fn test_patch_from_key_value() {
        let patch = ConfigPatch::from_key_value("watch.enabled", "yes").unwrap();
        assert_eq!(patch.watch_enabled, Some(true));
        assert!(patch.touches_ingestion());

        let patch = ConfigPatch::from_key_value("download_limit", "unlimited").unwrap();
        assert_eq!(patch.download_limit, Some(None));

        let patch =
            ConfigPatch::from_key_value("feeds.urls", "https://a.example/rss, https://b.example")
                .unwrap();
        assert_eq!(patch.feed_urls.unwrap().len(), 2);
    }

    #[test]
    fn test_patch_clearing_limit_survives_json() {
        let patch = ConfigPatch {
            download_limit: Some(None),
            ..ConfigPatch::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        let decoded: ConfigPatch = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.download_limit, Some(None));
        assert_eq!(decoded.upload_limit, None);
    }

    #[test]
    fn test_patch_from_key_value_rejects_bad_input() {
        assert!(matches!(
            ConfigPatch::from_key_value("colour", "blue"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            ConfigPatch::from_key_value("max_connections", "many"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
