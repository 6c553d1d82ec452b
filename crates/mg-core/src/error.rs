//! Core error types for magnetar

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ContentId;

/// Top-level error type for the magnetar ecosystem
#[derive(Error, Debug)]
pub enum MgError {
    /// Session lifecycle error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Persistence error
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by session lifecycle operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// Source is neither a magnet URI, an http(s) URL nor an existing file
    #[error("Source not found or invalid: {0}")]
    InvalidSource(String),

    /// Content metadata did not resolve within the allowed wait
    #[error("Metadata was not resolved within {0:?}")]
    MetadataTimeout(Duration),

    /// Underlying download engine failure
    #[error("Engine failure: {0}")]
    Engine(#[from] EngineError),

    /// Tracker URL is not an http(s), udp or ws(s) announce URL
    #[error("Invalid tracker URL: {0}")]
    InvalidTracker(String),

    /// Operation referenced an id with no live session
    #[error("Session not found: {0}")]
    NotFound(ContentId),

    /// Orchestrator is shutting down and no longer accepts work
    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

impl SessionError {
    /// Classify this error for the IPC boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidSource(_) => ErrorKind::InvalidSource,
            SessionError::MetadataTimeout(_) => ErrorKind::MetadataTimeout,
            SessionError::Engine(_) => ErrorKind::EngineFailure,
            SessionError::InvalidTracker(_) => ErrorKind::InvalidRequest,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

/// Serializable error classification carried in IPC error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSource,
    MetadataTimeout,
    EngineFailure,
    PersistenceFailure,
    NotFound,
    ShuttingDown,
    InvalidRequest,
}

/// Errors reported by a download engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The content is already registered with the engine
    #[error("Content already added: {0}")]
    Duplicate(ContentId),

    /// The id is held by a speculative registration that is about to be torn down
    #[error("Content is being inspected: {0}")]
    Inspecting(ContentId),

    /// The engine has no registration for this id
    #[error("Content not registered: {0}")]
    NotFound(ContentId),

    /// The content identifier or metadata could not be obtained
    #[error("Content unavailable: {0}")]
    Unavailable(String),

    /// Storage error inside the engine
    #[error("Engine I/O error: {0}")]
    Io(String),

    /// The engine has been shut down
    #[error("Engine is shut down")]
    Shutdown,

    /// Any other engine failure
    #[error("{0}")]
    Other(String),
}

/// Persistence errors. These are logged and absorbed by callers.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error while writing or renaming
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Value could not be encoded
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Key passed to `config set` is not a known setting
    #[error("Unknown config key: {0}")]
    UnknownKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_kinds() {
        let id = ContentId::new("abc");
        assert_eq!(
            SessionError::InvalidSource("x".into()).kind(),
            ErrorKind::InvalidSource
        );
        assert_eq!(SessionError::NotFound(id.clone()).kind(), ErrorKind::NotFound);
        assert_eq!(
            SessionError::Engine(EngineError::Duplicate(id)).kind(),
            ErrorKind::EngineFailure
        );
        assert_eq!(
            SessionError::InvalidTracker("ftp://x".into()).kind(),
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::MetadataTimeout).unwrap();
        assert_eq!(json, r#""metadata_timeout""#);
    }
}
