//! Single-instance lock for the daemon
//!
//! The daemon records its PID in `<config dir>/magnetar.pid`. A second daemon
//! refuses to start while that PID belongs to a live process; a file left
//! behind by a crashed daemon is treated as stale and replaced.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config;

const PID_FILE_NAME: &str = "magnetar.pid";

/// Errors acquiring the instance lock
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("Another magnetar daemon is already running (PID {0})")]
    AlreadyRunning(u32),

    #[error("Failed to write PID file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Default PID file location
pub fn default_pid_path() -> PathBuf {
    config::default_config_dir().join(PID_FILE_NAME)
}

/// PID recorded at `path`, if the file exists and parses
pub fn recorded_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse().ok())
}

/// PID of a live daemon holding the lock at `path`
pub fn running_pid(path: &Path) -> Option<u32> {
    recorded_pid(path).filter(|pid| is_process_alive(*pid))
}

/// Whether a process with this PID exists
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks liveness without signalling; EPERM still means it exists
    unsafe {
        if libc::kill(pid as libc::pid_t, 0) == 0 {
            return true;
        }
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

/// Held for the lifetime of the daemon; removes the PID file on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
}

impl InstanceLock {
    /// Claim the lock at `path` for the current process
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, InstanceError> {
        let path = path.into();
        let pid = std::process::id();

        match recorded_pid(&path) {
            Some(existing) if existing != pid && is_process_alive(existing) => {
                return Err(InstanceError::AlreadyRunning(existing));
            }
            Some(existing) => {
                tracing::debug!("Replacing stale PID file for {}", existing);
            }
            None => {}
        }

        write_pid(&path, pid).map_err(|source| InstanceError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("Instance lock acquired at {:?}", path);
        Ok(Self { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Only remove the file if it still names us
        if recorded_pid(&self.path) != Some(self.pid) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove PID file {:?}: {}", self.path, e),
        }
    }
}

fn write_pid(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", pid)
}
