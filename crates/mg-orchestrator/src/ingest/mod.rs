//! Automatic ingestion sources
//!
//! The folder watcher and the feed poller keep their own de-duplication
//! history and push candidate sources into one channel. The relay turns each
//! candidate into an ordinary `start`, for which a duplicate is a normal
//! outcome.

mod feed;
mod watcher;

pub use feed::{parse_feed, FeedHistory, FeedItem, FeedPoller, HISTORY_CAP};
pub use watcher::{FolderWatcher, DEFAULT_SETTLE};

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mg_core::config::AppConfig;
use mg_core::store::PersistentStore;

use crate::session::SessionOrchestrator;

/// Errors raised by ingestion sources
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Watch path is not a directory: {0:?}")]
    NotADirectory(PathBuf),

    #[error("Folder watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed could not be parsed: {0}")]
    Parse(String),
}

/// Owns the running ingestion sources and restarts them on config changes
pub struct Ingestion {
    store: PersistentStore,
    candidates: mpsc::UnboundedSender<String>,
    settle: Duration,
    watcher: Mutex<Option<FolderWatcher>>,
    poller: Mutex<Option<FeedPoller>>,
    poll_interval: Mutex<Duration>,
}

impl Ingestion {
    /// Create with no source running. Candidates go to `candidates`.
    pub fn new(store: PersistentStore, candidates: mpsc::UnboundedSender<String>) -> Self {
        Self {
            store,
            candidates,
            settle: DEFAULT_SETTLE,
            watcher: Mutex::new(None),
            poller: Mutex::new(None),
            poll_interval: Mutex::new(Duration::ZERO),
        }
    }

    /// Override the settle delay of the folder watcher
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Start, stop or restart sources to match `config`.
    ///
    /// Sources whose settings did not change keep running. Must be called
    /// from within a tokio runtime.
    pub fn reconfigure(&self, config: &AppConfig) {
        self.reconfigure_watcher(config);
        self.reconfigure_poller(config);
    }

    fn reconfigure_watcher(&self, config: &AppConfig) {
        let wanted = config.watch.active_path().cloned();
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);

        let current = watcher.as_ref().map(|w| w.path().to_path_buf());
        if current == wanted {
            return;
        }

        // Dropping the old watcher stops it
        *watcher = None;
        let Some(path) = wanted else {
            tracing::info!("Folder watching disabled");
            return;
        };

        match FolderWatcher::start(&path, self.candidates.clone(), self.settle) {
            Ok(started) => *watcher = Some(started),
            Err(e) => tracing::error!("Cannot watch {:?}: {}", path, e),
        }
    }

    fn reconfigure_poller(&self, config: &AppConfig) {
        let urls = config.feeds.urls.clone();
        let interval = config.feeds.poll_interval;
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        let mut current_interval = self
            .poll_interval
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let unchanged = match poller.as_ref() {
            Some(running) => running.urls() == urls.as_slice() && *current_interval == interval,
            None => urls.is_empty(),
        };
        if unchanged {
            return;
        }

        if let Some(old) = poller.take() {
            tokio::spawn(old.stop());
        }
        *current_interval = interval;
        if urls.is_empty() {
            tracing::info!("Feed polling disabled");
            return;
        }
        *poller = Some(FeedPoller::start(
            urls,
            interval,
            self.store.clone(),
            self.candidates.clone(),
        ));
    }

    /// Folder currently watched
    pub fn watching(&self) -> Option<PathBuf> {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|w| w.path().to_path_buf())
    }

    /// Number of feeds currently polled
    pub fn feed_count(&self) -> usize {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|p| p.urls().len())
            .unwrap_or(0)
    }

    /// Stop every source
    pub async fn stop(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(watcher);

        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            poller.stop().await;
        }
        tracing::debug!("Ingestion stopped");
    }
}

/// Feed candidates into the orchestrator until cancelled
pub fn spawn_relay(
    orchestrator: Arc<SessionOrchestrator>,
    mut candidates: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let source = tokio::select! {
                _ = cancel.cancelled() => break,
                source = candidates.recv() => match source {
                    Some(source) => source,
                    None => break,
                },
            };
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator.start_candidate(&source).await;
            });
        }
        tracing::debug!("Ingestion relay stopped");
    })
}
