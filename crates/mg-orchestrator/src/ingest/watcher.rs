//! Watched-folder ingestion
//!
//! Forwards every `*.torrent` file that appears in the folder. Files already
//! present when watching starts are forwarded too. A new file is only
//! forwarded after a short settle delay so a copy in progress is not picked up
//! half-written. Processed names are remembered, so rescans are harmless.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::IngestError;

/// Default wait between a file appearing and it being forwarded
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Keeps the OS watcher alive; dropping it stops watching
pub struct FolderWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
}

impl FolderWatcher {
    /// Start watching `path`. Must be called from within a tokio runtime.
    pub fn start(
        path: &Path,
        candidates: mpsc::UnboundedSender<String>,
        settle: Duration,
    ) -> Result<Self, IngestError> {
        if !path.is_dir() {
            return Err(IngestError::NotADirectory(path.to_path_buf()));
        }

        let processed = Arc::new(Mutex::new(HashSet::new()));
        let cancel = CancellationToken::new();
        let handle = tokio::runtime::Handle::current();

        let mut watcher: RecommendedWatcher = {
            let processed = Arc::clone(&processed);
            let candidates = candidates.clone();
            let cancel = cancel.clone();
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("Folder watch error: {}", e);
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }

                for file in event.paths.into_iter().filter(|p| is_torrent_file(p)) {
                    let processed = Arc::clone(&processed);
                    let candidates = candidates.clone();
                    let cancel = cancel.clone();
                    handle.spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(settle) => {}
                        }
                        if file.is_file() {
                            forward(&file, &processed, &candidates);
                        }
                    });
                }
            })?
        };
        watcher.watch(path, RecursiveMode::NonRecursive)?;

        let found = scan_existing(path, &processed, &candidates)?;
        tracing::info!("Watching {:?} ({} existing files)", path, found);

        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
            cancel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        tracing::debug!("Stopped watching {:?}", self.path);
    }
}

fn is_torrent_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("torrent"))
        .unwrap_or(false)
}

/// Forward a file once; later calls for the same name are ignored
fn forward(
    file: &Path,
    processed: &Mutex<HashSet<String>>,
    candidates: &mpsc::UnboundedSender<String>,
) -> bool {
    let Some(name) = file.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return false;
    };
    let fresh = processed
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name);
    if !fresh {
        return false;
    }

    tracing::debug!("Folder candidate {:?}", file);
    candidates.send(file.to_string_lossy().into_owned()).is_ok()
}

fn scan_existing(
    dir: &Path,
    processed: &Mutex<HashSet<String>>,
    candidates: &mpsc::UnboundedSender<String>,
) -> Result<usize, IngestError> {
    let mut found = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if is_torrent_file(&path) && path.is_file() && forward(&path, processed, candidates) {
            found += 1;
        }
    }
    Ok(found)
}
