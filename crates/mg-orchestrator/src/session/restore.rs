//! Restore sessions from persisted records at startup

use futures::future::join_all;

use mg_core::ipc::SessionEvent;
use mg_core::store::SESSIONS_KEY;
use mg_core::types::{PersistedRecord, StartOptions, StartOutcome};

use super::SessionOrchestrator;

/// Outcome of a startup restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Records found in the store
    pub attempted: usize,
    pub restored: usize,
    /// Records whose content already had a live session
    pub duplicates: usize,
    /// Malformed records and records whose start failed
    pub failed: usize,
}

enum RecordOutcome {
    Restored,
    Duplicate,
    Failed,
}

impl SessionOrchestrator {
    /// Start every persisted record concurrently and wait for all of them.
    ///
    /// Records are started without persisting, with their desired state and
    /// timestamps carried over. A bad record is logged and skipped.
    pub async fn restore(&self) -> RestoreReport {
        // Raw values so one malformed entry does not discard the list
        let raw: Vec<serde_json::Value> = self.store().load(SESSIONS_KEY, Vec::new());
        let attempted = raw.len();
        if attempted == 0 {
            return RestoreReport::default();
        }
        tracing::info!("Restoring {} sessions", attempted);

        let attempts = raw
            .into_iter()
            .enumerate()
            .map(|(index, value)| self.restore_one(index, value));
        let outcomes = join_all(attempts).await;

        let mut report = RestoreReport {
            attempted,
            ..RestoreReport::default()
        };
        for outcome in outcomes {
            match outcome {
                RecordOutcome::Restored => report.restored += 1,
                RecordOutcome::Duplicate => report.duplicates += 1,
                RecordOutcome::Failed => report.failed += 1,
            }
        }

        tracing::info!(
            "Restore finished: {} restored, {} duplicate, {} failed",
            report.restored,
            report.duplicates,
            report.failed
        );
        self.emit_restored(&report);
        report
    }

    async fn restore_one(&self, index: usize, value: serde_json::Value) -> RecordOutcome {
        let record: PersistedRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping malformed session record #{}: {}", index, e);
                return RecordOutcome::Failed;
            }
        };

        match self
            .start(&record.source_uri, StartOptions::restore(&record))
            .await
        {
            Ok(StartOutcome::Started { .. }) => RecordOutcome::Restored,
            Ok(StartOutcome::Duplicate) => RecordOutcome::Duplicate,
            Err(e) => {
                tracing::warn!("Failed to restore {}: {}", record.source_uri, e);
                RecordOutcome::Failed
            }
        }
    }

    fn emit_restored(&self, report: &RestoreReport) {
        self.emit_event(SessionEvent::Restored {
            restored: report.restored,
            failed: report.failed,
        });
    }
}
