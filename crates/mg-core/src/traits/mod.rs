//! Core trait definitions

mod engine;

pub use engine::{
    AddOptions, AddOutcome, DownloadEngine, EngineEvent, EngineStats, TransferSnapshot,
};
