//! Download engine implementations
//!
//! The wire protocol engine is an external collaborator reached through
//! [`mg_core::traits::DownloadEngine`]. This module ships the in-process
//! engine used by the daemon by default and by every test.

mod memory;

pub use memory::MemoryEngine;
