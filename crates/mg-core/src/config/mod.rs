//! Configuration management for magnetar

mod app;
pub mod serde_utils;

pub use app::{
    default_download_dir, AppConfig, ConfigPatch, FeedConfig, WatchConfig,
    DEFAULT_IPC_PORT, DEFAULT_MAX_CONNECTIONS,
};

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ConfigError;
use crate::store::{write_atomic, write_atomic_sync};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("magnetar")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file, atomically
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    write_atomic_sync(path, content.as_bytes())
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))
}

/// Shared, synchronously readable configuration.
///
/// Loaded once at startup; every explicit change goes through
/// [`ConfigHandle::apply`], which persists immediately on a background task.
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<AppConfig>,
    /// Serializes background writes so the file always ends on the newest value
    save_lock: tokio::sync::Mutex<()>,
}

impl ConfigHandle {
    /// Load from `path`, falling back to defaults if the file is missing or
    /// unreadable
    pub fn load(path: PathBuf) -> Self {
        let config = match load_config::<AppConfig>(&path) {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => {
                tracing::info!("No config at {:?}, using defaults", path);
                AppConfig::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load config from {:?}: {}", path, e);
                AppConfig::default()
            }
        };

        Self {
            path: Some(path),
            current: RwLock::new(config),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A handle that is never written to disk
    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(config),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the current configuration
    pub fn get(&self) -> AppConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `patch`, schedule an immediate write and return the new config.
    ///
    /// Must be called from within a tokio runtime.
    pub fn apply(self: &Arc<Self>, patch: &ConfigPatch) -> AppConfig {
        let updated = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            patch.apply(&mut current);
            current.clone()
        };

        let handle = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = handle.persist().await {
                tracing::error!("Failed to save config: {}", e);
            }
        });

        updated
    }

    /// Write the current configuration to the backing file
    pub async fn persist(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.save_lock.lock().await;
        let content = toml::to_string_pretty(&self.get())?;
        write_atomic(path, content.as_bytes())
            .await
            .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;
        tracing::debug!("Config saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = load_config::<AppConfig>(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_then_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = AppConfig {
            max_connections: 12,
            upload_limit: Some(4096),
            ..AppConfig::default()
        };

        save_config(&path, &config).unwrap();
        let loaded: AppConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_handle_load_corrupt_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_connections = \"lots\"").unwrap();

        let handle = ConfigHandle::load(path);
        assert_eq!(handle.get().max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[tokio::test]
    async fn test_handle_apply_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let handle = Arc::new(ConfigHandle::load(path.clone()));

        let patch = ConfigPatch {
            watch_enabled: Some(true),
            watch_path: Some(dir.path().join("inbox")),
            ..ConfigPatch::default()
        };
        let updated = handle.apply(&patch);
        assert!(updated.watch.enabled);
        assert!(handle.get().watch.enabled);

        // The write is asynchronous but not debounced
        let mut saved = None;
        for _ in 0..50 {
            if let Ok(config) = load_config::<AppConfig>(&path) {
                saved = Some(config);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let saved = saved.expect("config file was not written");
        assert!(saved.watch.enabled);
        assert_eq!(saved.watch.path, Some(dir.path().join("inbox")));
    }

    #[tokio::test]
    async fn test_in_memory_handle_never_writes() {
        let handle = Arc::new(ConfigHandle::in_memory(AppConfig::default()));
        handle.apply(&ConfigPatch {
            max_connections: Some(3),
            ..ConfigPatch::default()
        });
        assert_eq!(handle.get().max_connections, 3);
        assert!(handle.persist().await.is_ok());
        assert!(handle.path().is_none());
    }
}
