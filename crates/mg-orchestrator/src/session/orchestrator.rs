//! Session orchestrator
//!
//! Owns the live session set and reconciles user intent with the engine.
//!
//! # Serialization
//!
//! Every mutation of the session set happens while holding one async lock:
//! lifecycle operations, engine events and restore all funnel through it, so
//! for a given id operations apply in the order they acquire the lock. Engine
//! events are consumed by a single task ([`SessionOrchestrator::run_engine_events`])
//! one at a time. Waiting for the engine to resolve a content id happens
//! *before* taking the lock so a slow resolution never blocks other sessions.
//!
//! # Persistence
//!
//! Every state change schedules a debounced write of the full record set.
//! Write failures are logged by the store and never fail an operation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mg_core::config::{AppConfig, ConfigHandle};
use mg_core::error::{EngineError, SessionError};
use mg_core::ipc::{SessionEvent, Summary};
use mg_core::source::{is_tracker_url, SourceKind};
use mg_core::store::{PersistentStore, SESSIONS_KEY};
use mg_core::time::current_time_millis;
use mg_core::traits::{AddOptions, AddOutcome, DownloadEngine, EngineEvent};
use mg_core::types::{
    ContentId, ContentMetadata, DesiredState, FileEntry, LifecyclePhase, Session, StartOptions,
    StartOutcome,
};

use super::table::SessionTable;
use crate::power::PowerHold;
use crate::summary;

const EVENT_CAPACITY: usize = 1024;

/// Directory speculative `inspect` registrations point at
fn inspect_dir() -> PathBuf {
    std::env::temp_dir().join("magnetar-inspect")
}

/// Supervises every download session
pub struct SessionOrchestrator {
    engine: Arc<dyn DownloadEngine>,
    store: PersistentStore,
    config: Arc<ConfigHandle>,
    sessions: Mutex<SessionTable>,
    events: broadcast::Sender<SessionEvent>,
    /// Taken by the event loop; subscribed at construction so nothing is missed
    engine_events: StdMutex<Option<broadcast::Receiver<EngineEvent>>>,
    power: PowerHold,
    accepting: AtomicBool,
}

impl SessionOrchestrator {
    pub fn new(
        engine: Arc<dyn DownloadEngine>,
        store: PersistentStore,
        config: Arc<ConfigHandle>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine_events = engine.subscribe();
        Self {
            engine,
            store,
            config,
            sessions: Mutex::new(SessionTable::new()),
            events,
            engine_events: StdMutex::new(Some(engine_events)),
            power: PowerHold::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }

    pub fn power(&self) -> &PowerHold {
        &self.power
    }

    /// Whether new work is still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Snapshot of one session
    pub async fn get(&self, id: &ContentId) -> Option<Session> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Snapshot of every session, in added order
    pub async fn list(&self) -> Vec<Session> {
        self.sessions.lock().await.list()
    }

    /// (total, active) session counts
    pub async fn counts(&self) -> (usize, usize) {
        let table = self.sessions.lock().await;
        (table.len(), table.active_count())
    }

    /// Start a session for `source`.
    ///
    /// Resolves to [`StartOutcome::Duplicate`] when the content already has a
    /// live session.
    pub async fn start(
        &self,
        source: &str,
        options: StartOptions,
    ) -> Result<StartOutcome, SessionError> {
        if !self.is_accepting() {
            return Err(SessionError::ShuttingDown);
        }
        SourceKind::classify(source)?;

        let destination = options
            .path
            .clone()
            .unwrap_or_else(|| self.config.get().download_path);

        let add = self
            .engine
            .add(source, AddOptions::session(destination.clone()))
            .await;

        let id = match add {
            Ok(AddOutcome::Known(id)) => id,
            Ok(AddOutcome::Resolving(rx)) => match rx.await {
                Ok(Ok(id)) => id,
                Ok(Err(EngineError::Duplicate(id))) => return self.duplicate_of(&id),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(EngineError::Other("engine dropped the resolution".into()).into())
                }
            },
            Err(EngineError::Duplicate(id)) => return self.duplicate_of(&id),
            Err(e) => return Err(e.into()),
        };

        self.finalize(id, source.trim(), destination, options).await
    }

    /// Content under an inspection never lands here; the engine reports
    /// [`EngineError::Inspecting`] for it and the start fails.
    fn duplicate_of(&self, id: &ContentId) -> Result<StartOutcome, SessionError> {
        tracing::debug!("Duplicate start for {}", id.short());
        Ok(StartOutcome::Duplicate)
    }

    /// Record a session whose id the engine has accepted
    async fn finalize(
        &self,
        id: ContentId,
        source: &str,
        destination: PathBuf,
        options: StartOptions,
    ) -> Result<StartOutcome, SessionError> {
        let mut table = self.sessions.lock().await;
        if table.contains(&id) {
            return Ok(StartOutcome::Duplicate);
        }
        if !self.is_accepting() {
            return Err(SessionError::ShuttingDown);
        }

        let snapshot = self.engine.get(&id);
        let engine_done = snapshot.as_ref().map(|s| s.done).unwrap_or(false);
        let metadata_ready = snapshot.as_ref().map(|s| s.metadata_ready).unwrap_or(false);

        let (phase, completed_at) = match options.completed_at {
            Some(at) => (LifecyclePhase::Completed, Some(at)),
            None if engine_done => (LifecyclePhase::Completed, Some(current_time_millis())),
            None if metadata_ready => (LifecyclePhase::Transferring, None),
            None => (LifecyclePhase::Discovering, None),
        };

        let session = Session {
            id: id.clone(),
            source_uri: source.to_string(),
            destination,
            desired_state: options.desired_state,
            added_at: options.added_at.unwrap_or_else(current_time_millis),
            completed_at,
            phase,
        };
        self.apply_selection(&session);

        tracing::info!(
            "Session {} added ({}, {})",
            id.short(),
            session.phase,
            session.desired_state
        );
        table.insert(session);
        if !options.skip_persist {
            self.persist(&table);
        }
        self.power.set(table.any_transferring());
        drop(table);

        self.emit_event(SessionEvent::Added { id: id.clone() });
        if engine_done && options.completed_at.is_none() {
            self.emit_event(SessionEvent::Completed { id: id.clone() });
        }
        Ok(StartOutcome::Started { id })
    }

    /// Pause a session. Unknown ids, paused and completed sessions are no-ops.
    pub async fn pause(&self, id: &ContentId) -> Result<(), SessionError> {
        let mut table = self.sessions.lock().await;
        let Some(session) = table.get_mut(id) else {
            tracing::debug!("Pause for unknown session {}", id.short());
            return Ok(());
        };
        if session.is_paused() || session.phase == LifecyclePhase::Completed {
            return Ok(());
        }

        session.desired_state = DesiredState::Paused;
        if let Err(e) = self.engine.deselect(id) {
            tracing::warn!("Engine deselect failed for {}: {}", id.short(), e);
        }
        tracing::info!("Session {} paused", id.short());

        self.persist(&table);
        self.power.set(table.any_transferring());
        drop(table);

        self.emit_event(SessionEvent::Paused { id: id.clone() });
        Ok(())
    }

    /// Resume a session. Unknown ids, active and completed sessions are no-ops.
    pub async fn resume(&self, id: &ContentId) -> Result<(), SessionError> {
        let mut table = self.sessions.lock().await;
        let Some(session) = table.get_mut(id) else {
            tracing::debug!("Resume for unknown session {}", id.short());
            return Ok(());
        };
        if !session.is_paused() || session.phase == LifecyclePhase::Completed {
            return Ok(());
        }

        session.desired_state = DesiredState::Active;
        let session = session.clone();
        self.apply_selection(&session);
        tracing::info!("Session {} resumed", id.short());

        self.persist(&table);
        self.power.set(table.any_transferring());
        drop(table);

        self.emit_event(SessionEvent::Resumed { id: id.clone() });
        Ok(())
    }

    /// Tear down a session, optionally deleting its data.
    ///
    /// If the engine fails the session and its record stay untouched.
    pub async fn remove(&self, id: &ContentId, delete_files: bool) -> Result<(), SessionError> {
        let mut table = self.sessions.lock().await;
        if !table.contains(id) {
            return Err(SessionError::NotFound(id.clone()));
        }

        match self.engine.remove(id, delete_files).await {
            Ok(()) => {}
            Err(EngineError::NotFound(_)) => {
                tracing::warn!("Engine had no registration for {}", id.short());
            }
            Err(e) => {
                tracing::error!("Failed to remove {}: {}", id.short(), e);
                return Err(e.into());
            }
        }

        table.remove(id);
        tracing::info!("Session {} removed (delete files: {})", id.short(), delete_files);
        self.persist(&table);
        self.power.set(table.any_transferring());
        drop(table);

        self.emit_event(SessionEvent::Removed { id: id.clone() });
        Ok(())
    }

    /// Resolve content metadata without creating a session.
    ///
    /// The speculative registration is always torn down, on success, failure
    /// and timeout alike. Inspecting content that already has a live session
    /// reads its metadata and leaves the session alone.
    ///
    /// The engine marks the registration speculative as it creates it, so a
    /// `start` racing this call is refused from the moment the id exists,
    /// including while an http(s) source is still resolving.
    pub async fn inspect(&self, source: &str) -> Result<ContentMetadata, SessionError> {
        if !self.is_accepting() {
            return Err(SessionError::ShuttingDown);
        }
        SourceKind::classify(source)?;

        let timeout = self.config.get().metadata_timeout;
        let deadline = Instant::now() + timeout;

        let add = self
            .engine
            .add(source, AddOptions::speculative(inspect_dir()))
            .await;

        let id = match add {
            Ok(AddOutcome::Known(id)) => id,
            Ok(AddOutcome::Resolving(rx)) => match tokio::time::timeout_at(deadline, rx).await {
                // Dropping the receiver abandons the registration
                Err(_) => return Err(SessionError::MetadataTimeout(timeout)),
                Ok(Ok(Ok(id))) => id,
                Ok(Ok(Err(EngineError::Duplicate(id) | EngineError::Inspecting(id)))) => {
                    return self.existing_metadata(&id, deadline, timeout).await
                }
                Ok(Ok(Err(e))) => return Err(e.into()),
                Ok(Err(_)) => {
                    return Err(EngineError::Other("engine dropped the resolution".into()).into())
                }
            },
            Err(EngineError::Duplicate(id) | EngineError::Inspecting(id)) => {
                return self.existing_metadata(&id, deadline, timeout).await
            }
            Err(e) => return Err(e.into()),
        };

        let result = tokio::time::timeout_at(deadline, self.engine.metadata(&id)).await;
        if let Err(e) = self.engine.remove(&id, true).await {
            tracing::warn!("Failed to tear down inspection of {}: {}", id.short(), e);
        }

        match result {
            Ok(metadata) => metadata.map_err(Into::into),
            Err(_) => {
                tracing::debug!("Inspection of {} timed out", id.short());
                Err(SessionError::MetadataTimeout(timeout))
            }
        }
    }

    /// Files of a session with per-file progress. Empty until metadata is
    /// resolved.
    pub async fn files(&self, id: &ContentId) -> Result<Vec<FileEntry>, SessionError> {
        let table = self.sessions.lock().await;
        if !table.contains(id) {
            return Err(SessionError::NotFound(id.clone()));
        }
        Ok(self.engine.files(id)?)
    }

    /// Tracker announce URLs of a session
    pub async fn trackers(&self, id: &ContentId) -> Result<Vec<String>, SessionError> {
        let table = self.sessions.lock().await;
        if !table.contains(id) {
            return Err(SessionError::NotFound(id.clone()));
        }
        Ok(self.engine.trackers(id)?)
    }

    /// Announce a session to one more tracker.
    ///
    /// Added trackers live as long as the engine registration and are not
    /// part of the persisted record.
    pub async fn add_tracker(&self, id: &ContentId, url: &str) -> Result<(), SessionError> {
        let url = url.trim();
        if !is_tracker_url(url) {
            return Err(SessionError::InvalidTracker(url.to_string()));
        }
        let table = self.sessions.lock().await;
        if !table.contains(id) {
            return Err(SessionError::NotFound(id.clone()));
        }
        self.engine.add_tracker(id, url)?;
        tracing::info!("Session {} announces to {}", id.short(), url);
        Ok(())
    }

    async fn existing_metadata(
        &self,
        id: &ContentId,
        deadline: Instant,
        timeout: std::time::Duration,
    ) -> Result<ContentMetadata, SessionError> {
        match tokio::time::timeout_at(deadline, self.engine.metadata(id)).await {
            Ok(metadata) => metadata.map_err(Into::into),
            Err(_) => Err(SessionError::MetadataTimeout(timeout)),
        }
    }

    /// Consume engine events until cancelled or the engine goes away
    pub async fn run_engine_events(self: Arc<Self>, cancel: CancellationToken) {
        let taken = self
            .engine_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut rx) = taken else {
            tracing::warn!("Engine event loop already running");
            return;
        };

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(event) => self.handle_engine_event(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Engine event loop lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Engine event loop stopped");
    }

    /// Apply one engine event to the session set
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        tracing::trace!("Engine event: {:?}", event);
        match event {
            EngineEvent::MetadataResolved { id } => self.on_metadata(&id).await,
            EngineEvent::Done { id } => self.on_done(&id).await,
            EngineEvent::Warning { id, message } => {
                tracing::warn!("Engine warning for {}: {}", id.short(), message);
                self.emit_event(SessionEvent::Error {
                    id: Some(id),
                    message,
                });
            }
            EngineEvent::Error { message } => {
                tracing::error!("Engine error: {}", message);
                self.emit_event(SessionEvent::Error { id: None, message });
            }
        }
    }

    async fn on_metadata(&self, id: &ContentId) {
        let mut table = self.sessions.lock().await;
        let Some(session) = table.get_mut(id) else {
            return;
        };
        if session.phase != LifecyclePhase::Discovering {
            return;
        }

        session.phase = LifecyclePhase::Transferring;
        let session = session.clone();
        self.apply_selection(&session);
        tracing::info!("Session {} metadata resolved", id.short());
        self.power.set(table.any_transferring());
        drop(table);

        self.emit_event(SessionEvent::MetadataResolved { id: id.clone() });
    }

    async fn on_done(&self, id: &ContentId) {
        let mut table = self.sessions.lock().await;
        let Some(session) = table.get_mut(id) else {
            return;
        };
        // The engine may raise completion more than once
        if session.phase == LifecyclePhase::Completed {
            tracing::trace!("Ignoring repeated completion for {}", id.short());
            return;
        }

        session.phase = LifecyclePhase::Completed;
        session.completed_at = Some(current_time_millis());
        // Finished content is not seeded further
        if let Err(e) = self.engine.deselect(id) {
            tracing::warn!("Engine deselect failed for {}: {}", id.short(), e);
        }
        tracing::info!("Session {} completed", id.short());

        self.persist(&table);
        self.power.set(table.any_transferring());
        drop(table);

        self.emit_event(SessionEvent::Completed { id: id.clone() });
    }

    /// Tear down every session and forget persisted state.
    ///
    /// Sessions the engine fails to tear down stay in the table and in the
    /// state file, and are reported as an engine failure.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let mut table = self.sessions.lock().await;
        let mut cleared = Vec::new();
        let mut kept = Vec::new();
        for id in table.ids() {
            match self.engine.remove(&id, false).await {
                Ok(()) | Err(EngineError::NotFound(_)) => {
                    table.remove(&id);
                    cleared.push(id);
                }
                Err(e) => {
                    tracing::warn!("Engine teardown failed for {} during reset: {}", id.short(), e);
                    kept.push(id);
                }
            }
        }

        if kept.is_empty() {
            self.store.remove(SESSIONS_KEY).await;
        } else {
            self.store.save_now(SESSIONS_KEY, &table.records()).await;
        }
        self.power.set(table.any_transferring());
        drop(table);

        tracing::info!("Reset: {} sessions cleared, {} kept", cleared.len(), kept.len());
        for id in cleared {
            self.emit_event(SessionEvent::Removed { id });
        }

        if kept.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = kept.iter().map(|id| id.short()).collect();
        Err(EngineError::Other(format!(
            "{} session(s) could not be removed: {}",
            kept.len(),
            ids.join(", ")
        ))
        .into())
    }

    /// Read-only summary of every session
    pub async fn summary(&self) -> Summary {
        let sessions = self.list().await;
        summary::summarize(&sessions, |s| self.engine.get(&s.id), self.engine.stats())
    }

    /// Push rate limits and the connection ceiling to the engine
    pub fn apply_limits(&self, config: &AppConfig) {
        self.engine.throttle_download(config.download_limit);
        self.engine.throttle_upload(config.upload_limit);
        self.engine.set_max_connections(config.max_connections);
        tracing::debug!(
            "Limits applied: down {:?}, up {:?}, max connections {}",
            config.download_limit,
            config.upload_limit,
            config.max_connections
        );
    }

    /// Treat an ingestion candidate as an ordinary start. Duplicates are
    /// expected and silent.
    pub async fn start_candidate(&self, source: &str) {
        match self.start(source, StartOptions::default()).await {
            Ok(StartOutcome::Started { id }) => {
                tracing::info!("Ingested {} as {}", source, id.short());
            }
            Ok(StartOutcome::Duplicate) => {}
            Err(SessionError::ShuttingDown) => {}
            Err(e) => tracing::warn!("Ingestion candidate {} rejected: {}", source, e),
        }
    }

    /// Persist synchronously, stop accepting work and shut the engine down.
    ///
    /// Ingestion must already be stopped.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        let records = self.sessions.lock().await.records();
        self.store.save_now(SESSIONS_KEY, &records).await;
        self.store.flush().await;
        tracing::info!("Persisted {} sessions", records.len());

        self.power.release();
        self.engine.shutdown().await;
    }

    /// Select pieces when the session should transfer, release them otherwise
    fn apply_selection(&self, session: &Session) {
        let result = match (session.phase, session.desired_state) {
            (LifecyclePhase::Transferring, DesiredState::Active) => self.engine.select(&session.id),
            (LifecyclePhase::Discovering, DesiredState::Active) => Ok(()),
            _ => self.engine.deselect(&session.id),
        };
        if let Err(e) = result {
            tracing::warn!("Engine selection failed for {}: {}", session.id.short(), e);
        }
    }

    fn persist(&self, table: &SessionTable) {
        self.store.save_debounced(SESSIONS_KEY, &table.records());
    }

    pub(super) fn emit_event(&self, event: SessionEvent) {
        tracing::debug!("Session event: {:?}", event);
        let _ = self.events.send(event);
    }
}
