//! Shared daemon state

use std::sync::Arc;
use std::time::Instant;

use mg_core::config::ConfigHandle;

use crate::ingest::Ingestion;
use crate::session::SessionOrchestrator;

/// State shared by the IPC server and the daemon tasks
pub struct DaemonState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub ingestion: Arc<Ingestion>,
    /// Address the IPC server is bound to
    pub ipc_address: String,
    pub start_time: Instant,
}

impl DaemonState {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        ingestion: Arc<Ingestion>,
        ipc_address: String,
    ) -> Self {
        Self {
            orchestrator,
            ingestion,
            ipc_address,
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &Arc<ConfigHandle> {
        self.orchestrator.config()
    }
}
