//! IPC protocol between the CLI and the daemon
//!
//! Newline-delimited JSON over TCP on localhost (127.0.0.1). Requests and
//! responses are tagged with `type`; pushed events are tagged with `event`,
//! which lets a client tell them apart on a connection that is watching.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{AppConfig, ConfigPatch, DEFAULT_IPC_PORT};
use crate::error::ErrorKind;
use crate::types::{ContentId, ContentMetadata, FileEntry};

/// Default daemon address
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}

/// Request from a client to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Get daemon status
    GetStatus,

    /// Get the session summary
    GetSummary,

    /// Start a session for a source
    Start {
        source: String,
        #[serde(default)]
        path: Option<PathBuf>,
        /// Create the session paused
        #[serde(default)]
        paused: bool,
    },

    /// Resolve metadata without creating a session
    Inspect { source: String },

    Pause { id: ContentId },

    Resume { id: ContentId },

    Remove {
        id: ContentId,
        #[serde(default)]
        delete_files: bool,
    },

    /// Files of a session with per-file progress
    Files { id: ContentId },

    /// Tracker announce URLs of a session
    Trackers { id: ContentId },

    AddTracker { id: ContentId, url: String },

    GetConfig,

    /// Merge a partial config and persist it
    SetConfig { patch: ConfigPatch },

    /// Receive session events and summary pushes on this connection
    Watch,

    /// Stop receiving pushes
    Unwatch,

    /// Tear down every session and forget persisted state
    Reset,

    /// Ping (for keepalive)
    Ping,

    /// Shut the daemon down
    Shutdown,
}

/// Response from the daemon to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Status(DaemonStatus),

    Summary(Summary),

    /// A new session was created
    Started { id: ContentId },

    /// The content already has a live session
    Duplicate,

    Metadata(ContentMetadata),

    Files { files: Vec<FileEntry> },

    Trackers { trackers: Vec<String> },

    Config(AppConfig),

    /// Generic success
    Ok,

    /// Error response
    Error {
        #[serde(default)]
        kind: Option<ErrorKind>,
        message: String,
    },

    /// Pong response
    Pong,
}

impl IpcResponse {
    /// Error response with a classification
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        IpcResponse::Error {
            kind: Some(kind),
            message: message.into(),
        }
    }
}

/// Session lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    Added { id: ContentId },
    Removed { id: ContentId },
    Paused { id: ContentId },
    Resumed { id: ContentId },
    MetadataResolved { id: ContentId },
    Completed { id: ContentId },
    Error {
        #[serde(default)]
        id: Option<ContentId>,
        message: String,
    },
    /// Startup restore finished
    Restored { restored: usize, failed: usize },
}

impl SessionEvent {
    /// Session the event refers to, if any
    pub fn id(&self) -> Option<&ContentId> {
        match self {
            SessionEvent::Added { id }
            | SessionEvent::Removed { id }
            | SessionEvent::Paused { id }
            | SessionEvent::Resumed { id }
            | SessionEvent::MetadataResolved { id }
            | SessionEvent::Completed { id } => Some(id),
            SessionEvent::Error { id, .. } => id.as_ref(),
            SessionEvent::Restored { .. } => None,
        }
    }
}

/// Push from the daemon to watching clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IpcEvent {
    Session(SessionEvent),
    /// Throttled summary refresh
    Summary(Summary),
}

/// Any line a client can receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcMessage {
    Event(IpcEvent),
    Response(IpcResponse),
}

impl IpcMessage {
    /// Serialize to a JSON line, without the trailing newline
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<IpcResponse> for IpcMessage {
    fn from(resp: IpcResponse) -> Self {
        IpcMessage::Response(resp)
    }
}

impl From<IpcEvent> for IpcMessage {
    fn from(event: IpcEvent) -> Self {
        IpcMessage::Event(event)
    }
}

/// Daemon status information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub session_count: usize,
    /// Sessions not paused and not completed
    pub active_count: usize,
    pub version: String,
    pub ipc_address: String,
    pub state_dir: PathBuf,
    /// Folder being watched, if any
    pub watching: Option<PathBuf>,
    pub feed_count: usize,
}

/// Read-only projection of every session plus engine-wide counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub sessions: Vec<SessionSummary>,
    pub stats: AggregateStats,
}

/// Display status of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Metadata still resolving
    Checking,
    Downloading,
    Paused,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Checking => write!(f, "checking"),
            SessionStatus::Downloading => write!(f, "downloading"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Formatted view of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: ContentId,
    pub name: String,
    /// 0.0 ..= 1.0
    pub progress: f64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub num_peers: u32,
    pub total_size: u64,
    pub downloaded: u64,
    pub uploaded: u64,
    /// Milliseconds until done, if known
    pub time_remaining_ms: Option<u64>,
    pub is_paused: bool,
    pub is_metadata_loaded: bool,
    /// uploaded / downloaded, 0 when nothing was downloaded
    pub ratio: f64,
    pub status: SessionStatus,
    pub added_at: u64,
    pub completed_at: Option<u64>,
    pub num_files: usize,
    pub destination: PathBuf,
}

/// Engine-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub downloaded: u64,
    pub uploaded: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub session_count: usize,
    pub active_count: usize,
    pub completed_count: usize,
}
