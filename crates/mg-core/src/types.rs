//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Stable content identifier (info hash), independent of tracker or path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Create a content id, normalizing to lowercase
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_ascii_lowercase())
    }

    /// Get the raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form used in log lines and placeholder names
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(6)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// User intent for a session, independent of transient engine state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    #[default]
    Active,
    Paused,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesiredState::Active => write!(f, "active"),
            DesiredState::Paused => write!(f, "paused"),
        }
    }
}

/// Derived lifecycle phase of a session. Never persisted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Source added, content metadata not yet resolved
    Discovering,
    /// Metadata resolved, engine fetches or holds according to desired state
    Transferring,
    /// Content fully acquired
    Completed,
    /// Terminal; record purged
    Removed,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Discovering => write!(f, "discovering"),
            LifecyclePhase::Transferring => write!(f, "transferring"),
            LifecyclePhase::Completed => write!(f, "completed"),
            LifecyclePhase::Removed => write!(f, "removed"),
        }
    }
}

/// A supervised download session, one per content id
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: ContentId,
    /// Canonical way to re-acquire the content
    pub source_uri: String,
    /// Target directory; immutable after creation
    pub destination: PathBuf,
    pub desired_state: DesiredState,
    /// Unix millis
    pub added_at: u64,
    /// Unix millis, set exactly once on completion
    pub completed_at: Option<u64>,
    pub phase: LifecyclePhase,
}

impl Session {
    /// Whether the user asked for this session to be paused
    pub fn is_paused(&self) -> bool {
        self.desired_state == DesiredState::Paused
    }

    /// Whether the engine should be actively fetching pieces for this session
    pub fn wants_transfer(&self) -> bool {
        self.desired_state == DesiredState::Active && self.phase == LifecyclePhase::Transferring
    }

    /// Durable projection of this session
    pub fn record(&self) -> PersistedRecord {
        PersistedRecord {
            source_uri: self.source_uri.clone(),
            path: self.destination.clone(),
            desired_state: self.desired_state,
            added_at: self.added_at,
            completed_at: self.completed_at,
        }
    }
}

/// Durable projection of a session; excludes engine-derived transient fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    #[serde(rename = "sourceURI")]
    pub source_uri: String,
    pub path: PathBuf,
    #[serde(default)]
    pub desired_state: DesiredState,
    pub added_at: u64,
    #[serde(default)]
    pub completed_at: Option<u64>,
}

/// Single file inside a piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub index: usize,
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub progress: f64,
}

/// Resolved content metadata, as returned by `inspect`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    pub id: ContentId,
    pub name: String,
    pub files: Vec<FileEntry>,
    pub total_size: u64,
}

/// Options accepted by the orchestrator's `start` operation
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Destination override; defaults to the configured download path
    pub path: Option<PathBuf>,
    pub desired_state: DesiredState,
    /// Carried over when restoring a persisted record
    pub added_at: Option<u64>,
    /// Carried over when restoring a persisted record
    pub completed_at: Option<u64>,
    /// Skip the persist call (used while restoring)
    pub skip_persist: bool,
}

impl StartOptions {
    /// Options reconstructing a persisted record without re-persisting it
    pub fn restore(record: &PersistedRecord) -> Self {
        Self {
            path: Some(record.path.clone()),
            desired_state: record.desired_state,
            added_at: Some(record.added_at),
            completed_at: record.completed_at,
            skip_persist: true,
        }
    }
}

/// Resolved outcome of a `start` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new session was created
    Started { id: ContentId },
    /// The content already has a live session; nothing was created
    Duplicate,
}

impl StartOutcome {
    /// Whether this outcome is the duplicate case
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StartOutcome::Duplicate)
    }

    /// The id of the newly created session, if any
    pub fn id(&self) -> Option<&ContentId> {
        match self {
            StartOutcome::Started { id } => Some(id),
            StartOutcome::Duplicate => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_normalizes_case() {
        let id = ContentId::new("ABCDEF0123");
        assert_eq!(id.as_str(), "abcdef0123");
        assert_eq!(id.short(), "abcdef");
        assert_eq!(ContentId::new("ab").short(), "ab");
    }

    #[test]
    fn test_short_id_stops_on_char_boundary() {
        let id = ContentId::new("aééééééé");
        assert_eq!(id.short(), "aééééé");
        assert_eq!(ContentId::new("aééé").short(), "aééé");
    }

    #[test]
    fn test_persisted_record_field_names() {
        let record = PersistedRecord {
            source_uri: "magnet:?xt=urn:btih:aa".to_string(),
            path: PathBuf::from("/tmp/dl"),
            desired_state: DesiredState::Paused,
            added_at: 10,
            completed_at: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sourceURI"], "magnet:?xt=urn:btih:aa");
        assert_eq!(json["desiredState"], "paused");
        assert_eq!(json["addedAt"], 10);
        assert!(json["completedAt"].is_null());
    }

    #[test]
    fn test_persisted_record_defaults_missing_state() {
        let json = r#"{"sourceURI":"magnet:?xt=urn:btih:aa","path":"/tmp","addedAt":1}"#;
        let record: PersistedRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.desired_state, DesiredState::Active);
        assert_eq!(record.completed_at, None);
    }

    #[test]
    fn test_session_wants_transfer() {
        let mut session = Session {
            id: ContentId::new("a"),
            source_uri: "magnet:?xt=urn:btih:a".to_string(),
            destination: PathBuf::from("/tmp"),
            desired_state: DesiredState::Active,
            added_at: 1,
            completed_at: None,
            phase: LifecyclePhase::Discovering,
        };
        assert!(!session.wants_transfer());
        session.phase = LifecyclePhase::Transferring;
        assert!(session.wants_transfer());
        session.desired_state = DesiredState::Paused;
        assert!(!session.wants_transfer());
    }

    #[test]
    fn test_start_outcome_serialization() {
        let json = serde_json::to_string(&StartOutcome::Duplicate).unwrap();
        assert_eq!(json, r#"{"outcome":"duplicate"}"#);
        assert!(StartOutcome::Duplicate.is_duplicate());
    }
}
