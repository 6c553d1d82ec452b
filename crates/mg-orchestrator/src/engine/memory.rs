//! In-process download engine
//!
//! Derives content ids the way a BitTorrent engine would (magnet `btih`,
//! digest of a metainfo file or URL) and tracks registrations, selection and
//! throttles in memory. No bytes are exchanged with peers; progress advances
//! only through the test controls or the optional transfer simulation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;

use mg_core::config::DEFAULT_MAX_CONNECTIONS;
use mg_core::error::EngineError;
use mg_core::source::{MagnetLink, SourceKind};
use mg_core::traits::{
    AddOptions, AddOutcome, DownloadEngine, EngineEvent, EngineStats, TransferSnapshot,
};
use mg_core::types::{ContentId, ContentMetadata, FileEntry};

const EVENT_CAPACITY: usize = 256;
const SIMULATION_TICK: Duration = Duration::from_millis(250);

/// Engine keeping every registration in memory
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

struct Inner {
    registrations: DashMap<ContentId, Registration>,
    events: broadcast::Sender<EngineEvent>,
    /// Publish metadata as soon as it is derivable from the source
    auto_metadata: bool,
    resolve_delay: Duration,
    limits: Mutex<Limits>,
    max_connections: AtomicU32,
    fail_next_remove: AtomicBool,
    shut_down: AtomicBool,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, Default)]
struct Limits {
    download: Option<u64>,
    upload: Option<u64>,
}

struct Registration {
    path: PathBuf,
    /// Made for an inspection; never becomes a session
    speculative: bool,
    trackers: Vec<String>,
    metadata: watch::Sender<Option<ContentMetadata>>,
    selected: bool,
    done: bool,
    downloaded: u64,
    uploaded: u64,
    download_speed: u64,
    num_peers: u32,
}

impl Registration {
    fn new(options: AddOptions, trackers: Vec<String>) -> Self {
        let (metadata, _) = watch::channel(None);
        Self {
            path: options.path,
            speculative: options.speculative,
            trackers,
            metadata,
            selected: false,
            done: false,
            downloaded: 0,
            uploaded: 0,
            download_speed: 0,
            num_peers: 0,
        }
    }

    fn length(&self) -> u64 {
        self.metadata
            .borrow()
            .as_ref()
            .map(|m| m.total_size)
            .unwrap_or(0)
    }

    /// Files with progress; acquired bytes fill files in order
    fn files(&self) -> Vec<FileEntry> {
        let Some(metadata) = self.metadata.borrow().clone() else {
            return Vec::new();
        };
        let mut remaining = self.downloaded;
        metadata
            .files
            .into_iter()
            .map(|mut file| {
                let acquired = remaining.min(file.size);
                remaining -= acquired;
                file.progress = match (self.done, file.size) {
                    (true, _) => 1.0,
                    (false, 0) => 0.0,
                    (false, size) => acquired as f64 / size as f64,
                };
                file
            })
            .collect()
    }

    fn snapshot(&self, id: &ContentId) -> TransferSnapshot {
        let metadata = self.metadata.borrow().clone();
        let metadata_ready = metadata.is_some();
        let length = metadata.as_ref().map(|m| m.total_size).unwrap_or(0);
        let progress = if self.done {
            1.0
        } else if length > 0 {
            self.downloaded as f64 / length as f64
        } else {
            0.0
        };
        let time_remaining_ms = (self.download_speed > 0 && !self.done)
            .then(|| length.saturating_sub(self.downloaded) * 1000 / self.download_speed);

        TransferSnapshot {
            id: id.clone(),
            name: metadata.as_ref().map(|m| m.name.clone()),
            progress,
            num_peers: self.num_peers,
            download_speed: self.download_speed,
            upload_speed: 0,
            downloaded: self.downloaded,
            uploaded: self.uploaded,
            length,
            files: self.files(),
            time_remaining_ms,
            metadata_ready,
            done: self.done,
            selected: self.selected,
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Engine that publishes metadata whenever the source carries it
    pub fn new() -> Self {
        Self::build(true, Duration::ZERO)
    }

    /// Engine that only publishes metadata through [`publish_metadata`](Self::publish_metadata)
    pub fn manual() -> Self {
        Self::build(false, Duration::ZERO)
    }

    /// Delay before an http(s) source resolves to an id
    pub fn with_resolve_delay(self, delay: Duration) -> Self {
        let auto = self.inner.auto_metadata;
        Self::build(auto, delay)
    }

    fn build(auto_metadata: bool, resolve_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registrations: DashMap::new(),
                events,
                auto_metadata,
                resolve_delay,
                limits: Mutex::new(Limits::default()),
                max_connections: AtomicU32::new(DEFAULT_MAX_CONNECTIONS),
                fail_next_remove: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Advance every selected registration at `bytes_per_sec` until done.
    ///
    /// Must be called from within a tokio runtime. Stops on shutdown.
    pub fn simulate_transfers(&self, bytes_per_sec: u64) {
        if bytes_per_sec == 0 {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let step = (bytes_per_sec / 4).max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SIMULATION_TICK);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let limit = inner.limits().download.unwrap_or(u64::MAX);
                let step = step.min(limit / 4).max(1);
                let mut finished = Vec::new();
                for mut entry in inner.registrations.iter_mut() {
                    let length = entry.length();
                    if !entry.selected || entry.done || length == 0 {
                        continue;
                    }
                    entry.downloaded = (entry.downloaded + step).min(length);
                    entry.download_speed = step * 4;
                    entry.num_peers = entry.num_peers.max(1);
                    if entry.downloaded == length {
                        entry.done = true;
                        entry.download_speed = 0;
                        finished.push(entry.key().clone());
                    }
                }
                for id in finished {
                    inner.emit(EngineEvent::Done { id });
                }
            }
        });
    }

    /// Make metadata for `id` available and announce it
    pub fn publish_metadata(&self, id: &ContentId, name: &str, files: &[(&str, u64)]) -> bool {
        let metadata = ContentMetadata {
            id: id.clone(),
            name: name.to_string(),
            files: files
                .iter()
                .enumerate()
                .map(|(index, (file, size))| FileEntry {
                    index,
                    name: file.to_string(),
                    size: *size,
                    progress: 0.0,
                })
                .collect(),
            total_size: files.iter().map(|(_, size)| size).sum(),
        };
        self.inner.publish(id, metadata)
    }

    /// Mark a registration fully acquired and raise `Done`
    pub fn finish(&self, id: &ContentId) -> bool {
        let Some(mut reg) = self.inner.registrations.get_mut(id) else {
            return false;
        };
        reg.done = true;
        reg.downloaded = reg.length();
        reg.download_speed = 0;
        drop(reg);
        self.inner.emit(EngineEvent::Done { id: id.clone() });
        true
    }

    /// Raise `Done` again without changing anything
    pub fn reannounce_done(&self, id: &ContentId) {
        self.inner.emit(EngineEvent::Done { id: id.clone() });
    }

    /// Set transfer counters for a registration
    pub fn set_transfer(&self, id: &ContentId, downloaded: u64, uploaded: u64, speed: u64, peers: u32) {
        if let Some(mut reg) = self.inner.registrations.get_mut(id) {
            reg.downloaded = downloaded;
            reg.uploaded = uploaded;
            reg.download_speed = speed;
            reg.num_peers = peers;
        }
    }

    /// Make the next `remove` call fail
    pub fn fail_next_remove(&self) {
        self.inner.fail_next_remove.store(true, Ordering::SeqCst);
    }

    pub fn is_registered(&self, id: &ContentId) -> bool {
        self.inner.registrations.contains_key(id)
    }

    pub fn is_selected(&self, id: &ContentId) -> bool {
        self.inner
            .registrations
            .get(id)
            .map(|reg| reg.selected)
            .unwrap_or(false)
    }

    pub fn registration_count(&self) -> usize {
        self.inner.registrations.len()
    }

    /// Destination a registration was added with
    pub fn destination(&self, id: &ContentId) -> Option<PathBuf> {
        self.inner.registrations.get(id).map(|reg| reg.path.clone())
    }

    pub fn download_limit(&self) -> Option<u64> {
        self.inner.limits().download
    }

    pub fn upload_limit(&self) -> Option<u64> {
        self.inner.limits().upload
    }

    pub fn max_connections(&self) -> u32 {
        self.inner.max_connections.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn add_resolving(&self, url: String, options: AddOptions) -> AddOutcome {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            if !inner.resolve_delay.is_zero() {
                tokio::time::sleep(inner.resolve_delay).await;
            }
            if tx.is_closed() {
                tracing::debug!("Resolution of {} abandoned", url);
                return;
            }

            let id = ContentId::new(digest_id(url.as_bytes()));
            let result = inner.register(&id, options, Vec::new());
            if result.is_ok() && inner.auto_metadata {
                inner.publish(&id, name_from_url(&id, &url));
            }

            let registered = result.is_ok();
            if tx.send(result.map(|_| id.clone())).is_err() && registered {
                // Caller gave up while we were registering
                inner.registrations.remove(&id);
                tracing::debug!("Dropped abandoned registration {}", id.short());
            }
        });

        AddOutcome::Resolving(rx)
    }
}

impl Inner {
    fn limits(&self) -> Limits {
        *self.limits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn register(
        &self,
        id: &ContentId,
        options: AddOptions,
        trackers: Vec<String>,
    ) -> Result<(), EngineError> {
        match self.registrations.entry(id.clone()) {
            Entry::Occupied(existing) if existing.get().speculative => {
                Err(EngineError::Inspecting(id.clone()))
            }
            Entry::Occupied(_) => Err(EngineError::Duplicate(id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(Registration::new(options, trackers));
                tracing::debug!("Registered {}", id.short());
                Ok(())
            }
        }
    }

    fn publish(&self, id: &ContentId, metadata: ContentMetadata) -> bool {
        let Some(reg) = self.registrations.get(id) else {
            return false;
        };
        reg.metadata.send_replace(Some(metadata));
        drop(reg);
        self.emit(EngineEvent::MetadataResolved { id: id.clone() });
        true
    }
}

#[async_trait]
impl DownloadEngine for MemoryEngine {
    async fn add(&self, source: &str, options: AddOptions) -> Result<AddOutcome, EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::Shutdown);
        }

        let kind = SourceKind::classify(source)
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        match kind {
            SourceKind::Magnet => {
                let link = MagnetLink::parse(source).unwrap_or_default();
                let hash = link
                    .info_hash
                    .clone()
                    .ok_or_else(|| EngineError::Unavailable("magnet has no info hash".into()))?;
                let id = ContentId::new(hash);
                self.inner.register(&id, options, link.trackers.clone())?;

                if self.inner.auto_metadata {
                    if let Some(name) = &link.display_name {
                        let size = link.exact_length.unwrap_or(0);
                        self.publish_metadata(&id, name, &[(name.as_str(), size)]);
                    }
                }
                Ok(AddOutcome::Known(id))
            }
            SourceKind::Http => Ok(self.add_resolving(source.trim().to_string(), options)),
            SourceKind::File(file) => {
                let bytes = tokio::fs::read(&file)
                    .await
                    .map_err(|e| EngineError::Io(format!("{}: {}", file.display(), e)))?;
                let id = ContentId::new(digest_id(&bytes));
                self.inner.register(&id, options, Vec::new())?;

                if self.inner.auto_metadata {
                    let name = file
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| id.short().to_string());
                    let size = bytes.len() as u64;
                    self.publish_metadata(&id, &name, &[(name.as_str(), size)]);
                }
                Ok(AddOutcome::Known(id))
            }
        }
    }

    async fn remove(&self, id: &ContentId, destroy_data: bool) -> Result<(), EngineError> {
        if self.inner.fail_next_remove.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Io(format!("failed to tear down {}", id.short())));
        }
        match self.inner.registrations.remove(id) {
            Some((_, reg)) => {
                tracing::debug!(
                    "Removed {} from {:?} (destroy data: {})",
                    id.short(),
                    reg.path,
                    destroy_data
                );
                Ok(())
            }
            None => Err(EngineError::NotFound(id.clone())),
        }
    }

    fn get(&self, id: &ContentId) -> Option<TransferSnapshot> {
        self.inner.registrations.get(id).map(|reg| reg.snapshot(id))
    }

    async fn metadata(&self, id: &ContentId) -> Result<ContentMetadata, EngineError> {
        let mut rx = self
            .inner
            .registrations
            .get(id)
            .map(|reg| reg.metadata.subscribe())
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;

        let metadata = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::Unavailable(format!("{} was removed", id.short())))?;
        (*metadata)
            .clone()
            .ok_or_else(|| EngineError::Unavailable(id.to_string()))
    }

    fn files(&self, id: &ContentId) -> Result<Vec<FileEntry>, EngineError> {
        self.inner
            .registrations
            .get(id)
            .map(|reg| reg.files())
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    fn trackers(&self, id: &ContentId) -> Result<Vec<String>, EngineError> {
        self.inner
            .registrations
            .get(id)
            .map(|reg| reg.trackers.clone())
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    fn add_tracker(&self, id: &ContentId, url: &str) -> Result<(), EngineError> {
        let mut reg = self
            .inner
            .registrations
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        if !reg.trackers.iter().any(|known| known == url) {
            reg.trackers.push(url.to_string());
            tracing::debug!("Tracker {} added to {}", url, id.short());
        }
        Ok(())
    }

    fn select(&self, id: &ContentId) -> Result<(), EngineError> {
        let mut reg = self
            .inner
            .registrations
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        reg.selected = true;
        Ok(())
    }

    fn deselect(&self, id: &ContentId) -> Result<(), EngineError> {
        let mut reg = self
            .inner
            .registrations
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        reg.selected = false;
        reg.num_peers = 0;
        reg.download_speed = 0;
        Ok(())
    }

    fn throttle_download(&self, limit: Option<u64>) {
        self.inner
            .limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .download = limit;
    }

    fn throttle_upload(&self, limit: Option<u64>) {
        self.inner
            .limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upload = limit;
    }

    fn set_max_connections(&self, max: u32) {
        self.inner.max_connections.store(max, Ordering::SeqCst);
    }

    fn stats(&self) -> EngineStats {
        self.inner
            .registrations
            .iter()
            .fold(EngineStats::default(), |mut stats, reg| {
                stats.downloaded += reg.downloaded;
                stats.uploaded += reg.uploaded;
                stats.download_speed += reg.download_speed;
                stats
            })
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        let count = self.inner.registrations.len();
        self.inner.registrations.clear();
        tracing::info!("Engine shut down ({} registrations released)", count);
    }
}

/// 40 hex chars of a SHA-256 digest, the length of a v1 info hash
fn digest_id(bytes: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(bytes));
    digest[..40].to_string()
}

fn name_from_url(id: &ContentId, url: &str) -> ContentMetadata {
    let name = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.trim_end_matches(".torrent").to_string())
        .unwrap_or_else(|| id.short().to_string());

    ContentMetadata {
        id: id.clone(),
        name: name.clone(),
        files: vec![FileEntry {
            index: 0,
            name,
            size: 0,
            progress: 0.0,
        }],
        total_size: 0,
    }
}
