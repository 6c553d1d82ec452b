//! Download engine capability
//!
//! The transfer protocol lives outside this workspace. The orchestrator only
//! needs the narrow surface below: register content, tear it down, toggle
//! piece selection, throttle, and observe progress.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{broadcast, oneshot};

use crate::error::EngineError;
use crate::types::{ContentId, ContentMetadata, FileEntry};

/// Options for registering new content with the engine
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Directory the content is written into
    pub path: PathBuf,
    /// Registration made only to read metadata. Adding the same content
    /// while it exists fails with [`EngineError::Inspecting`] rather than
    /// [`EngineError::Duplicate`].
    pub speculative: bool,
}

impl AddOptions {
    /// Options for a session registration
    pub fn session(path: PathBuf) -> Self {
        Self {
            path,
            speculative: false,
        }
    }

    /// Options for a registration that only lives for an inspection
    pub fn speculative(path: PathBuf) -> Self {
        Self {
            path,
            speculative: true,
        }
    }
}

/// How the engine learned the content id of a new registration
#[derive(Debug)]
pub enum AddOutcome {
    /// The id was derivable from the source itself
    Known(ContentId),
    /// The id becomes known once the source has been fetched.
    ///
    /// Dropping the receiver abandons the registration: the engine must not
    /// keep anything for it once resolution finishes.
    Resolving(oneshot::Receiver<Result<ContentId, EngineError>>),
}

/// Notifications pushed by the engine, processed one at a time by the
/// orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Name and file list of the content are now available
    MetadataResolved { id: ContentId },
    /// Every piece has been acquired. May be raised more than once.
    Done { id: ContentId },
    /// Non-fatal problem with one registration
    Warning { id: ContentId, message: String },
    /// Engine-wide failure
    Error { message: String },
}

/// Point-in-time view of one registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub id: ContentId,
    /// Content name; `None` until metadata is resolved
    pub name: Option<String>,
    /// 0.0 ..= 1.0
    pub progress: f64,
    pub num_peers: u32,
    /// Bytes/s
    pub download_speed: u64,
    /// Bytes/s
    pub upload_speed: u64,
    pub downloaded: u64,
    pub uploaded: u64,
    /// Total content size in bytes; 0 until metadata is resolved
    pub length: u64,
    pub files: Vec<FileEntry>,
    /// Estimated milliseconds until done, if the engine can tell
    pub time_remaining_ms: Option<u64>,
    pub metadata_ready: bool,
    pub done: bool,
    /// Whether pieces are currently selected for acquisition
    pub selected: bool,
}

/// Engine-wide transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub downloaded: u64,
    pub uploaded: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
}

/// Minimum surface of a transfer engine supervised by the orchestrator
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Register content. Fails with [`EngineError::Duplicate`] when the id is
    /// already registered, or [`EngineError::Inspecting`] when the existing
    /// registration is speculative; a `Resolving` outcome may resolve to
    /// either error too.
    async fn add(&self, source: &str, options: AddOptions) -> Result<AddOutcome, EngineError>;

    /// Tear down a registration, optionally deleting acquired data
    async fn remove(&self, id: &ContentId, destroy_data: bool) -> Result<(), EngineError>;

    /// Snapshot of a registration, if it exists
    fn get(&self, id: &ContentId) -> Option<TransferSnapshot>;

    /// Wait until metadata for `id` is available and return it.
    ///
    /// Callers bound this with their own timeout.
    async fn metadata(&self, id: &ContentId) -> Result<ContentMetadata, EngineError>;

    /// Files of a registration with per-file progress. Empty until metadata
    /// is resolved.
    fn files(&self, id: &ContentId) -> Result<Vec<FileEntry>, EngineError>;

    /// Tracker announce URLs of a registration
    fn trackers(&self, id: &ContentId) -> Result<Vec<String>, EngineError>;

    /// Announce to one more tracker. A tracker already known is a no-op.
    fn add_tracker(&self, id: &ContentId, url: &str) -> Result<(), EngineError>;

    /// Select the full piece range for acquisition
    fn select(&self, id: &ContentId) -> Result<(), EngineError>;

    /// Release the full piece range and drop active peer connections.
    /// Acquired data is kept.
    fn deselect(&self, id: &ContentId) -> Result<(), EngineError>;

    /// Engine-wide download limit in bytes/s (`None` = unlimited)
    fn throttle_download(&self, limit: Option<u64>);

    /// Engine-wide upload limit in bytes/s (`None` = unlimited)
    fn throttle_upload(&self, limit: Option<u64>);

    /// Ceiling on simultaneous peer connections
    fn set_max_connections(&self, max: u32);

    fn stats(&self) -> EngineStats;

    /// Subscribe to engine events
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Stop every transfer and release engine resources
    async fn shutdown(&self);
}
