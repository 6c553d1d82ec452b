//! mg-core: Core abstractions, configuration and persistence for magnetar
//!
//! This crate provides the shared session types, the error taxonomy, the
//! download engine capability trait, the durable key-scoped store and the
//! IPC wire types used by the orchestrator daemon and the CLI.

pub mod config;
pub mod error;
pub mod instance;
pub mod ipc;
pub mod source;
pub mod store;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{EngineError, MgError, SessionError};
pub use store::PersistentStore;
pub use types::{ContentId, DesiredState, LifecyclePhase, PersistedRecord, Session};
