//! mg-orchestrator: The magnetar download-session daemon
//!
//! The daemon supervises durable download sessions on top of a download
//! engine. It reconciles user intent with engine state, persists the session
//! set across restarts, absorbs folder and feed ingestion into the same
//! lifecycle, and provides the IPC interface for the CLI.

pub mod daemon;
pub mod engine;
pub mod ingest;
pub mod ipc;
pub mod power;
pub mod session;
pub mod state;
pub mod summary;

pub use daemon::DaemonOptions;
pub use engine::MemoryEngine;
pub use session::{RestoreReport, SessionOrchestrator};
pub use state::DaemonState;
