//! IPC client for communicating with the daemon
//!
//! Uses TCP on localhost for cross-platform compatibility.

mod client;

pub use client::{is_not_running, DaemonClient};

// Re-export protocol types from mg_core
pub use mg_core::ipc::{
    default_ipc_address, DaemonStatus, IpcEvent, SessionEvent, SessionStatus, SessionSummary,
    Summary,
};
