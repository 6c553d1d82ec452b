//! Durable key-scoped JSON store
//!
//! Each key maps to `<dir>/<key>.json`. Writes go to a temporary sibling
//! file that is then renamed over the target, so a crash mid-write leaves
//! the previous valid file in place.
//!
//! # Debouncing
//!
//! [`PersistentStore::save_debounced`] keeps only the newest value per key
//! and writes it once no newer value has arrived for the debounce delay.
//! All writes are serialized through one async lock and the pending value is
//! taken while holding that lock, so an older value can never be written
//! after a newer one.
//!
//! Write failures are logged and swallowed: the in-memory state of the
//! caller stays authoritative and the next successful write carries the
//! latest value anyway.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Key holding the persisted session record list
pub const SESSIONS_KEY: &str = "sessions";

/// Key holding identifiers of feed items already seen
pub const FEED_HISTORY_KEY: &str = "feed-history";

/// Default quiet period before a debounced value is written
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Durable key-scoped state with atomic writes and debounced flushing
#[derive(Clone)]
pub struct PersistentStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    dir: PathBuf,
    debounce: Duration,
    /// Newest not-yet-written value per key
    pending: DashMap<String, Pending>,
    /// Serializes every write to disk
    write_lock: Mutex<()>,
    next_token: AtomicU64,
    writes: AtomicU64,
}

struct Pending {
    token: u64,
    value: serde_json::Value,
}

impl PersistentStore {
    /// Create a store rooted at `dir` with the given debounce delay
    pub fn new(dir: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                dir: dir.into(),
                debounce,
                pending: DashMap::new(),
                write_lock: Mutex::new(()),
                next_token: AtomicU64::new(1),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Directory holding the store files
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// File backing a key
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.inner.path_for(key)
    }

    /// Number of successful writes since creation
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Whether any debounced value is waiting to be written
    pub fn has_pending(&self) -> bool {
        !self.inner.pending.is_empty()
    }

    /// Read a key, returning `fallback` if the file is missing or corrupt
    pub fn load<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let path = self.path_for(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return fallback,
            Err(e) => {
                tracing::warn!("Load warning for {:?}: {}", path, e);
                return fallback;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Ignoring corrupt store file {:?}: {}", path, e);
                fallback
            }
        }
    }

    /// Write a value immediately, superseding any pending debounced value
    pub async fn save_now<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_save_now(key, value).await {
            tracing::error!("Write error for '{}': {}", key, e);
        }
    }

    /// Like [`save_now`](Self::save_now) but reports the failure
    pub async fn try_save_now<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        let _guard = self.inner.write_lock.lock().await;
        self.inner.pending.remove(key);
        self.inner.write_value(key, &value).await
    }

    /// Schedule a write after the debounce delay, keeping only the newest value.
    ///
    /// Must be called from within a tokio runtime.
    pub fn save_debounced<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Cannot serialize value for '{}': {}", key, e);
                return;
            }
        };

        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        self.inner
            .pending
            .insert(key.to_string(), Pending { token, value });

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;

            let _guard = inner.write_lock.lock().await;
            // A newer call replaced the token; its own timer will write.
            let Some((_, pending)) = inner.pending.remove_if(&key, |_, p| p.token == token) else {
                return;
            };
            if let Err(e) = inner.write_value(&key, &pending.value).await {
                tracing::error!("Debounced write error for '{}': {}", key, e);
            }
        });
    }

    /// Write every pending debounced value now and wait for in-flight writes
    pub async fn flush(&self) {
        let _guard = self.inner.write_lock.lock().await;
        let keys: Vec<String> = self
            .inner
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            if let Some((_, pending)) = self.inner.pending.remove(&key) {
                if let Err(e) = self.inner.write_value(&key, &pending.value).await {
                    tracing::error!("Flush error for '{}': {}", key, e);
                }
            }
        }
    }

    /// Drop any pending value for a key and delete its file
    pub async fn remove(&self, key: &str) {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.pending.remove(key);
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
        }
    }
}

impl StoreInner {
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    async fn write_value(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(&path, &bytes).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("Persisted '{}' ({} bytes)", key, bytes.len());
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` via a temporary file and an atomic rename
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)
}

/// Blocking variant of [`write_atomic`] for synchronous callers
pub fn write_atomic_sync(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = temp_path(path);
    std::fs::write(&tmp, bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir, debounce_ms: u64) -> PersistentStore {
        PersistentStore::new(dir.path(), Duration::from_millis(debounce_ms))
    }

    #[test]
    fn test_load_missing_returns_fallback() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let value: Vec<String> = store.load("nothing", vec!["default".to_string()]);
        assert_eq!(value, vec!["default".to_string()]);
    }

    #[test]
    fn test_load_corrupt_returns_fallback() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        std::fs::write(store.path_for("broken"), "{ not json").unwrap();
        let value: Vec<u32> = store.load("broken", vec![7]);
        assert_eq!(value, vec![7]);
    }

    #[tokio::test]
    async fn test_save_now_round_trip_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);

        store.save_now("numbers", &vec![1, 2, 3]).await;

        let loaded: Vec<u32> = store.load("numbers", vec![]);
        assert_eq!(loaded, vec![1, 2, 3]);
        assert!(!dir.path().join("numbers.json.tmp").exists());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_save_now_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let store = PersistentStore::new(dir.path().join("nested/state"), DEFAULT_DEBOUNCE);
        store.save_now("k", &true).await;
        assert!(dir.path().join("nested/state/k.json").exists());
    }

    #[tokio::test]
    async fn test_debounced_burst_writes_once_with_latest_value() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 50);

        for i in 0..10u32 {
            store.save_debounced("burst", &i);
        }
        assert!(store.has_pending());
        assert_eq!(store.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(store.write_count(), 1);
        assert!(!store.has_pending());
        let loaded: u32 = store.load("burst", 0);
        assert_eq!(loaded, 9);
    }

    #[tokio::test]
    async fn test_flush_writes_pending_immediately() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 60_000);

        store.save_debounced("slow", &"latest");
        store.flush().await;

        assert_eq!(store.write_count(), 1);
        let loaded: String = store.load("slow", String::new());
        assert_eq!(loaded, "latest");
        assert!(!store.has_pending());
    }

    #[tokio::test]
    async fn test_save_now_supersedes_pending_value() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 50);

        store.save_debounced("k", &"stale");
        store.save_now("k", &"fresh").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let loaded: String = store.load("k", String::new());
        assert_eq!(loaded, "fresh");
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_file_and_pending() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 50);

        store.save_now("gone", &1).await;
        store.save_debounced("gone", &2);
        store.remove("gone").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!store.path_for("gone").exists());
        assert!(!store.has_pending());
    }

    #[test]
    fn test_write_atomic_sync_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        write_atomic_sync(&path, b"a = 1").unwrap();
        write_atomic_sync(&path, b"a = 2").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 2");
    }
}
