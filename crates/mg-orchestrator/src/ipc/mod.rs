//! IPC server for CLI communication
//!
//! Serves newline-delimited JSON on localhost TCP to the `magnetar` CLI and
//! any other local front end.

mod server;

pub use server::{IpcServer, SUMMARY_PUSH_INTERVAL};
