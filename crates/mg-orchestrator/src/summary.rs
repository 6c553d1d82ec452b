//! Read-only summary projection of sessions and engine state

use mg_core::ipc::{AggregateStats, SessionStatus, SessionSummary, Summary};
use mg_core::traits::{EngineStats, TransferSnapshot};
use mg_core::types::{LifecyclePhase, Session};

/// Build the summary for `sessions`, looking up engine state per session
pub fn summarize<F>(sessions: &[Session], snapshot: F, stats: EngineStats) -> Summary
where
    F: Fn(&Session) -> Option<TransferSnapshot>,
{
    let sessions: Vec<SessionSummary> = sessions
        .iter()
        .map(|session| summarize_session(session, snapshot(session).as_ref()))
        .collect();

    let completed_count = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Completed)
        .count();
    let active_count = sessions
        .iter()
        .filter(|s| matches!(s.status, SessionStatus::Downloading | SessionStatus::Checking))
        .count();

    Summary {
        stats: AggregateStats {
            downloaded: stats.downloaded,
            uploaded: stats.uploaded,
            download_speed: stats.download_speed,
            upload_speed: stats.upload_speed,
            session_count: sessions.len(),
            active_count,
            completed_count,
        },
        sessions,
    }
}

/// Format one session. Engine state may be missing while the engine is
/// still registering the content.
pub fn summarize_session(session: &Session, snapshot: Option<&TransferSnapshot>) -> SessionSummary {
    let completed = session.phase == LifecyclePhase::Completed;
    let paused = session.is_paused();
    let metadata_loaded = snapshot.map(|s| s.metadata_ready).unwrap_or(false);

    let status = if completed {
        SessionStatus::Completed
    } else if paused {
        SessionStatus::Paused
    } else if !metadata_loaded || session.phase == LifecyclePhase::Discovering {
        SessionStatus::Checking
    } else {
        SessionStatus::Downloading
    };

    let name = snapshot
        .and_then(|s| s.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("Loading... ({})", session.id.short()));

    let downloaded = snapshot.map(|s| s.downloaded).unwrap_or(0);
    let uploaded = snapshot.map(|s| s.uploaded).unwrap_or(0);
    let ratio = if downloaded > 0 {
        uploaded as f64 / downloaded as f64
    } else {
        0.0
    };

    // Paused sessions report no transfer even if the engine still drains
    let moving = !paused && !completed;

    SessionSummary {
        id: session.id.clone(),
        name,
        progress: if completed {
            1.0
        } else {
            snapshot.map(|s| s.progress).unwrap_or(0.0)
        },
        download_speed: snapshot.filter(|_| moving).map(|s| s.download_speed).unwrap_or(0),
        upload_speed: snapshot.filter(|_| moving).map(|s| s.upload_speed).unwrap_or(0),
        num_peers: snapshot.filter(|_| moving).map(|s| s.num_peers).unwrap_or(0),
        total_size: snapshot.map(|s| s.length).unwrap_or(0),
        downloaded,
        uploaded,
        time_remaining_ms: snapshot.filter(|_| moving).and_then(|s| s.time_remaining_ms),
        is_paused: paused,
        is_metadata_loaded: metadata_loaded,
        ratio,
        status,
        added_at: session.added_at,
        completed_at: session.completed_at,
        num_files: snapshot.map(|s| s.files.len()).unwrap_or(0),
        destination: session.destination.clone(),
    }
}
