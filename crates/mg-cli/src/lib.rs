//! magnetar: command-line interface for the download-session daemon
//!
//! Provides the `magnetar` CLI for running the daemon and managing the
//! sessions it supervises.

pub mod commands;
pub mod ipc;
pub mod output;
