//! CLI command implementations

mod config;
mod list;
mod session;
mod status;
mod watch;

pub use config::{config_get, config_path, config_set, config_show};
pub use list::{list_command, StatusFilter};
pub use session::{
    add_command, files_command, inspect_command, pause_command, remove_command, reset_command,
    resume_command, trackers_command,
};
pub use status::status_command;
pub use watch::watch_command;
