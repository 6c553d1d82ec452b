//! List command implementation

use anyhow::Result;
use clap::ValueEnum;

use crate::ipc::{DaemonClient, SessionStatus};
use crate::output::{format_sessions, format_stats};

/// Session status accepted by `list --status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Checking,
    Downloading,
    Paused,
    Completed,
}

impl StatusFilter {
    fn matches(self, status: SessionStatus) -> bool {
        matches!(
            (self, status),
            (StatusFilter::Checking, SessionStatus::Checking)
                | (StatusFilter::Downloading, SessionStatus::Downloading)
                | (StatusFilter::Paused, SessionStatus::Paused)
                | (StatusFilter::Completed, SessionStatus::Completed)
        )
    }
}

/// Execute the list command
pub async fn list_command(
    client: &mut DaemonClient,
    status: Option<StatusFilter>,
    long: bool,
) -> Result<()> {
    let summary = client.summary().await?;

    let sessions: Vec<_> = summary
        .sessions
        .into_iter()
        .filter(|s| status.map_or(true, |wanted| wanted.matches(s.status)))
        .collect();

    println!("{}", format_sessions(&sessions, long));
    if !sessions.is_empty() {
        println!("{}", format_stats(&summary.stats));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_filter_matches_only_its_status() {
        assert!(StatusFilter::Paused.matches(SessionStatus::Paused));
        assert!(!StatusFilter::Paused.matches(SessionStatus::Downloading));
        assert!(StatusFilter::Checking.matches(SessionStatus::Checking));
        assert!(!StatusFilter::Completed.matches(SessionStatus::Checking));
    }
}
