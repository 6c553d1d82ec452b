//! Session lifecycle management

mod orchestrator;
mod restore;
mod table;

pub use orchestrator::SessionOrchestrator;
pub use restore::RestoreReport;
pub use table::SessionTable;
