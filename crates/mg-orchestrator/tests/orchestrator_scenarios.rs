//! Session orchestrator scenarios
//!
//! Drives the orchestrator against the in-memory engine and a store in a
//! temporary directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use mg_core::config::{AppConfig, ConfigHandle};
use mg_core::error::{EngineError, SessionError};
use mg_core::ipc::SessionEvent;
use mg_core::store::{PersistentStore, SESSIONS_KEY};
use mg_core::types::{
    ContentId, DesiredState, LifecyclePhase, PersistedRecord, StartOptions, StartOutcome,
};
use mg_orchestrator::{MemoryEngine, SessionOrchestrator};

const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const HASH_C: &str = "cccccccccccccccccccccccccccccccccccccccc";

fn magnet(hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{}&dn=content-{}&xl=1000", hash, &hash[..4])
}

/// Magnet without a display name: the manual engine never resolves it
fn bare_magnet(hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{}", hash)
}

struct Harness {
    engine: MemoryEngine,
    orchestrator: Arc<SessionOrchestrator>,
    store: PersistentStore,
    cancel: CancellationToken,
}

impl Harness {
    fn new(dir: &Path, engine: MemoryEngine) -> Self {
        Self::with_debounce(dir, engine, Duration::from_millis(50))
    }

    fn with_debounce(dir: &Path, engine: MemoryEngine, debounce: Duration) -> Self {
        Self::with_store(dir, engine, PersistentStore::new(dir, debounce))
    }

    /// Downloads go under `dir`; state goes wherever `store` points
    fn with_store(dir: &Path, engine: MemoryEngine, store: PersistentStore) -> Self {
        let config = AppConfig {
            download_path: dir.join("downloads"),
            state_dir: store.dir().to_path_buf(),
            persist_debounce: Duration::from_millis(50),
            metadata_timeout: Duration::from_millis(200),
            ..AppConfig::default()
        };
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::new(engine.clone()),
            store.clone(),
            Arc::new(ConfigHandle::in_memory(config)),
        ));

        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&orchestrator).run_engine_events(cancel.clone()));

        Self {
            engine,
            orchestrator,
            store,
            cancel,
        }
    }

    fn records(&self) -> Vec<PersistedRecord> {
        self.store.load(SESSIONS_KEY, Vec::new())
    }

    async fn start(&self, source: &str) -> Result<StartOutcome, SessionError> {
        self.orchestrator.start(source, StartOptions::default()).await
    }

    async fn start_id(&self, source: &str) -> ContentId {
        match self.start(source).await {
            Ok(StartOutcome::Started { id }) => id,
            other => panic!("Expected a new session, got {:?}", other),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn wait_for_event<F>(rx: &mut broadcast::Receiver<SessionEvent>, matches: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("Event stream failed: {:?}", e),
            }
        }
    })
    .await
    .expect("Timed out waiting for session event")
}

#[tokio::test]
async fn test_start_persists_record_after_debounce() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let outcome = h.start(&magnet(HASH_A)).await.unwrap();
    assert_eq!(
        outcome,
        StartOutcome::Started {
            id: ContentId::new(HASH_A)
        }
    );

    // Nothing on disk until the quiet period elapses
    assert!(h.records().is_empty());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_uri, magnet(HASH_A));
    assert_eq!(records[0].desired_state, DesiredState::Active);
    assert_eq!(records[0].path, dir.path().join("downloads"));
}

#[tokio::test]
async fn test_same_content_is_a_duplicate() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    h.start_id(&magnet(HASH_A)).await;
    let again = h.start(&magnet(HASH_A)).await.unwrap();
    assert_eq!(again, StartOutcome::Duplicate);

    // Different spelling, same content id
    let upper = bare_magnet(&HASH_A.to_uppercase());
    assert_eq!(h.start(&upper).await.unwrap(), StartOutcome::Duplicate);

    h.store.flush().await;
    assert_eq!(h.records().len(), 1);
}

#[tokio::test]
async fn test_concurrent_starts_create_one_session() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let source = magnet(HASH_A);
    let outcomes = join_all((0..8).map(|_| h.start(&source))).await;

    let started = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(StartOutcome::Started { .. })))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(StartOutcome::Duplicate)))
        .count();
    assert_eq!(started, 1);
    assert_eq!(duplicates, 7);

    h.store.flush().await;
    assert_eq!(h.records().len(), 1);
    assert_eq!(h.orchestrator.list().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_http_starts_create_one_session() {
    let dir = TempDir::new().unwrap();
    let engine = MemoryEngine::new().with_resolve_delay(Duration::from_millis(20));
    let h = Harness::new(dir.path(), engine);

    let source = "https://example.com/releases/show.torrent";
    let outcomes = join_all((0..4).map(|_| h.start(source))).await;

    let started = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(StartOutcome::Started { .. })))
        .count();
    assert_eq!(started, 1);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, Ok(StartOutcome::Started { .. }) | Ok(StartOutcome::Duplicate))));
}

#[tokio::test]
async fn test_invalid_source_is_rejected() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let result = h.start("definitely not a source").await;
    assert!(matches!(result, Err(SessionError::InvalidSource(_))));
    assert_eq!(h.engine.registration_count(), 0);
}

#[tokio::test]
async fn test_non_ascii_info_hash_is_rejected_without_registration() {
    // Log formatting of ids must run for this to matter
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();

    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());
    let source = "magnet:?xt=urn:btih:a%C3%A9%C3%A9%C3%A9";

    for _ in 0..2 {
        let result = h.start(source).await;
        assert!(matches!(result, Err(SessionError::InvalidSource(_))));
    }
    let inspected = h.orchestrator.inspect(source).await;
    assert!(matches!(inspected, Err(SessionError::InvalidSource(_))));

    assert_eq!(h.engine.registration_count(), 0);
    assert!(h.orchestrator.list().await.is_empty());

    // The orchestrator is still usable afterwards
    h.start_id(&magnet(HASH_A)).await;
    assert_eq!(h.orchestrator.list().await.len(), 1);
}

#[tokio::test]
async fn test_local_file_source() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("ubuntu.torrent");
    std::fs::write(&file, b"d4:infod4:name6:ubuntuee").unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let id = h.start_id(file.to_str().unwrap()).await;
    assert_eq!(id.as_str().len(), 40);

    let summary = h.orchestrator.summary().await;
    assert_eq!(summary.sessions[0].name, "ubuntu");
}

#[tokio::test]
async fn test_rapid_mutations_coalesce_into_one_write() {
    let dir = TempDir::new().unwrap();
    let h = Harness::with_debounce(dir.path(), MemoryEngine::new(), Duration::from_millis(150));

    let id = h.start_id(&magnet(HASH_A)).await;
    h.orchestrator.pause(&id).await.unwrap();
    h.orchestrator.resume(&id).await.unwrap();
    h.orchestrator.pause(&id).await.unwrap();
    assert_eq!(h.store.write_count(), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(h.store.write_count(), 1);
    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].desired_state, DesiredState::Paused);
}

#[tokio::test]
async fn test_pause_releases_selection_and_resume_restores_it() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let id = h.start_id(&magnet(HASH_A)).await;
    assert!(h.engine.is_selected(&id));

    h.orchestrator.pause(&id).await.unwrap();
    assert!(!h.engine.is_selected(&id));
    assert!(h.orchestrator.get(&id).await.unwrap().is_paused());

    h.orchestrator.resume(&id).await.unwrap();
    assert!(h.engine.is_selected(&id));
    assert_eq!(
        h.orchestrator.get(&id).await.unwrap().desired_state,
        DesiredState::Active
    );
}

#[tokio::test]
async fn test_pause_and_resume_of_unknown_id_are_noops() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let ghost = ContentId::new(HASH_C);
    assert!(h.orchestrator.pause(&ghost).await.is_ok());
    assert!(h.orchestrator.resume(&ghost).await.is_ok());
    assert!(!h.store.has_pending());
}

#[tokio::test]
async fn test_pause_resume_on_completed_session_is_noop() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());
    let mut events = h.orchestrator.subscribe();

    let id = h.start_id(&magnet(HASH_A)).await;
    h.engine.finish(&id);
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Completed { .. })).await;

    let before = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(before.phase, LifecyclePhase::Completed);

    h.orchestrator.pause(&id).await.unwrap();
    h.orchestrator.resume(&id).await.unwrap();

    let after = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(after.desired_state, before.desired_state);
    assert_eq!(after.phase, LifecyclePhase::Completed);
    assert!(!h.engine.is_selected(&id));
}

#[tokio::test]
async fn test_completion_stops_seeding_and_records_time() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());
    let mut events = h.orchestrator.subscribe();

    let id = h.start_id(&magnet(HASH_A)).await;
    h.engine.finish(&id);
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Completed { .. })).await;

    let session = h.orchestrator.get(&id).await.unwrap();
    let completed_at = session.completed_at.expect("completion time");
    assert!(!h.engine.is_selected(&id));

    // A repeated completion signal changes nothing
    h.engine.reannounce_done(&id);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.orchestrator.get(&id).await.unwrap().completed_at,
        Some(completed_at)
    );

    h.store.flush().await;
    assert_eq!(h.records()[0].completed_at, Some(completed_at));
}

#[tokio::test]
async fn test_session_completing_while_paused_becomes_completed() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());
    let mut events = h.orchestrator.subscribe();

    let id = h.start_id(&magnet(HASH_A)).await;
    h.orchestrator.pause(&id).await.unwrap();
    h.engine.finish(&id);
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Completed { .. })).await;

    let session = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(session.phase, LifecyclePhase::Completed);
    assert_eq!(session.desired_state, DesiredState::Paused);
    assert!(session.completed_at.is_some());
}

#[tokio::test]
async fn test_metadata_resolution_moves_to_transferring() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::manual());
    let mut events = h.orchestrator.subscribe();

    let id = h.start_id(&bare_magnet(HASH_A)).await;
    let session = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(session.phase, LifecyclePhase::Discovering);
    assert!(!h.engine.is_selected(&id));

    assert!(h.engine.publish_metadata(&id, "alpha", &[("alpha.mkv", 500)]));
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::MetadataResolved { .. })
    })
    .await;

    let session = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(session.phase, LifecyclePhase::Transferring);
    assert!(h.engine.is_selected(&id));
}

#[tokio::test]
async fn test_paused_session_is_not_selected_on_metadata() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::manual());
    let mut events = h.orchestrator.subscribe();

    let id = match h
        .orchestrator
        .start(
            &bare_magnet(HASH_A),
            StartOptions {
                desired_state: DesiredState::Paused,
                ..StartOptions::default()
            },
        )
        .await
        .unwrap()
    {
        StartOutcome::Started { id } => id,
        other => panic!("unexpected {:?}", other),
    };

    h.engine.publish_metadata(&id, "alpha", &[("alpha.mkv", 500)]);
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::MetadataResolved { .. })
    })
    .await;
    assert!(!h.engine.is_selected(&id));
}

#[tokio::test]
async fn test_remove_then_start_creates_fresh_record() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let id = h.start_id(&magnet(HASH_A)).await;
    h.store.flush().await;
    let first_added = h.records()[0].added_at;

    tokio::time::sleep(Duration::from_millis(5)).await;
    h.orchestrator.remove(&id, true).await.unwrap();
    h.store.flush().await;
    assert!(h.records().is_empty());
    assert!(!h.engine.is_registered(&id));

    h.start_id(&magnet(HASH_A)).await;
    h.store.flush().await;
    let records = h.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].added_at > first_added);
}

#[tokio::test]
async fn test_remove_unknown_id_is_reported() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let result = h.orchestrator.remove(&ContentId::new(HASH_B), false).await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn test_failed_engine_removal_keeps_session() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let id = h.start_id(&magnet(HASH_A)).await;
    h.engine.fail_next_remove();

    let result = h.orchestrator.remove(&id, true).await;
    assert!(matches!(result, Err(SessionError::Engine(_))));
    assert!(h.orchestrator.get(&id).await.is_some());

    h.store.flush().await;
    assert_eq!(h.records().len(), 1);
}

#[tokio::test]
async fn test_unwritable_state_dir_never_fails_operations() {
    let dir = TempDir::new().unwrap();
    // A regular file where the state directory should be
    let blocked = dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"").unwrap();
    let store = PersistentStore::new(&blocked, Duration::from_millis(10));
    let h = Harness::with_store(dir.path(), MemoryEngine::new(), store);

    let a = h.start_id(&magnet(HASH_A)).await;
    let b = h.start_id(&magnet(HASH_B)).await;
    h.orchestrator.pause(&b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.store.flush().await;

    let sessions = h.orchestrator.list().await;
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, a);
    assert_eq!(sessions[0].desired_state, DesiredState::Active);
    assert_eq!(sessions[1].id, b);
    assert!(sessions[1].is_paused());
    assert_eq!(h.store.write_count(), 0);

    // Shutdown still completes; the failed write is only logged
    h.orchestrator.shutdown().await;
    assert!(blocked.is_file());
    assert_eq!(h.store.write_count(), 0);

    // The same sessions against a writable directory persist as expected
    let good = TempDir::new().unwrap();
    let healthy = Harness::new(good.path(), MemoryEngine::new());
    for session in &sessions {
        let options = StartOptions {
            skip_persist: false,
            ..StartOptions::restore(&session.record())
        };
        let outcome = healthy
            .orchestrator
            .start(&session.source_uri, options)
            .await
            .unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));
    }
    healthy.orchestrator.shutdown().await;

    let expected: Vec<PersistedRecord> = sessions.iter().map(|s| s.record()).collect();
    assert_eq!(healthy.records(), expected);
}

#[tokio::test]
async fn test_restore_survives_one_malformed_record() {
    let dir = TempDir::new().unwrap();
    let downloads = dir.path().join("downloads");
    let records = serde_json::json!([
        { "sourceURI": magnet(HASH_A), "path": downloads, "desiredState": "active", "addedAt": 10 },
        { "unexpected": true },
        { "sourceURI": magnet(HASH_B), "path": downloads, "desiredState": "paused", "addedAt": 20 },
        { "sourceURI": magnet(HASH_C), "path": downloads, "desiredState": "active", "addedAt": 30 },
    ]);
    std::fs::write(
        dir.path().join("sessions.json"),
        serde_json::to_vec_pretty(&records).unwrap(),
    )
    .unwrap();

    let h = Harness::new(dir.path(), MemoryEngine::new());
    let mut events = h.orchestrator.subscribe();
    let report = h.orchestrator.restore().await;

    assert_eq!(report.attempted, 4);
    assert_eq!(report.restored, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(h.orchestrator.list().await.len(), 3);

    // Restoring does not rewrite the record set
    assert!(!h.store.has_pending());
    assert_eq!(h.store.write_count(), 0);

    let restored = wait_for_event(&mut events, |e| matches!(e, SessionEvent::Restored { .. })).await;
    assert_eq!(
        restored,
        SessionEvent::Restored {
            restored: 3,
            failed: 1
        }
    );

    let b = h.orchestrator.get(&ContentId::new(HASH_B)).await.unwrap();
    assert_eq!(b.added_at, 20);
    assert!(b.is_paused());
}

#[tokio::test]
async fn test_paused_session_survives_restart_without_selection() {
    let dir = TempDir::new().unwrap();

    let id = {
        let h = Harness::new(dir.path(), MemoryEngine::new());
        let id = h.start_id(&magnet(HASH_A)).await;
        h.orchestrator.pause(&id).await.unwrap();
        h.orchestrator.shutdown().await;
        assert!(h.engine.is_shut_down());
        id
    };

    let engine = MemoryEngine::new();
    let h = Harness::new(dir.path(), engine.clone());
    let report = h.orchestrator.restore().await;
    assert_eq!(report.restored, 1);

    let session = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(session.desired_state, DesiredState::Paused);
    assert!(engine.is_registered(&id));
    assert!(!engine.is_selected(&id));
}

#[tokio::test]
async fn test_completed_record_restores_as_completed() {
    let dir = TempDir::new().unwrap();
    let records = serde_json::json!([{
        "sourceURI": magnet(HASH_A),
        "path": dir.path().join("downloads"),
        "desiredState": "active",
        "addedAt": 10,
        "completedAt": 99
    }]);
    std::fs::write(
        dir.path().join("sessions.json"),
        serde_json::to_vec(&records).unwrap(),
    )
    .unwrap();

    let h = Harness::new(dir.path(), MemoryEngine::new());
    h.orchestrator.restore().await;

    let id = ContentId::new(HASH_A);
    let session = h.orchestrator.get(&id).await.unwrap();
    assert_eq!(session.phase, LifecyclePhase::Completed);
    assert_eq!(session.completed_at, Some(99));
    assert!(!h.engine.is_selected(&id));
}

#[tokio::test]
async fn test_inspect_resolves_without_creating_session() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let metadata = h.orchestrator.inspect(&magnet(HASH_A)).await.unwrap();
    assert_eq!(metadata.name, "content-aaaa");
    assert_eq!(metadata.total_size, 1000);

    assert_eq!(h.engine.registration_count(), 0);
    assert!(h.orchestrator.list().await.is_empty());
    assert!(!h.store.has_pending());
}

#[tokio::test]
async fn test_inspect_timeout_leaves_no_registration() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::manual());

    let result = h.orchestrator.inspect(&bare_magnet(HASH_A)).await;
    assert!(matches!(result, Err(SessionError::MetadataTimeout(_))));
    assert_eq!(h.engine.registration_count(), 0);

    // A clean start on the same source succeeds normally
    h.start_id(&bare_magnet(HASH_A)).await;
}

#[tokio::test]
async fn test_inspect_of_unresolvable_http_source_times_out() {
    let dir = TempDir::new().unwrap();
    let engine = MemoryEngine::new().with_resolve_delay(Duration::from_secs(5));
    let h = Harness::new(dir.path(), engine);

    let result = h
        .orchestrator
        .inspect("https://example.com/slow.torrent")
        .await;
    assert!(matches!(result, Err(SessionError::MetadataTimeout(_))));
    assert_eq!(h.engine.registration_count(), 0);
}

#[tokio::test]
async fn test_inspect_of_live_session_leaves_it_alone() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let id = h.start_id(&magnet(HASH_A)).await;
    let metadata = h.orchestrator.inspect(&magnet(HASH_A)).await.unwrap();
    assert_eq!(metadata.id, id);
    assert!(h.engine.is_registered(&id));
    assert!(h.orchestrator.get(&id).await.is_some());
}

#[tokio::test]
async fn test_start_during_inspect_is_an_engine_failure() {
    let dir = TempDir::new().unwrap();
    let engine = MemoryEngine::manual();
    let h = Harness::new(dir.path(), engine.clone());

    let orchestrator = Arc::clone(&h.orchestrator);
    let source = bare_magnet(HASH_A);
    let inspecting = {
        let source = source.clone();
        tokio::spawn(async move { orchestrator.inspect(&source).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let result = h.start(&source).await;
    assert!(matches!(
        result,
        Err(SessionError::Engine(EngineError::Inspecting(_)))
    ));

    let id = ContentId::new(HASH_A);
    engine.publish_metadata(&id, "alpha", &[("alpha.mkv", 1)]);
    assert!(inspecting.await.unwrap().is_ok());
    assert_eq!(engine.registration_count(), 0);
}

#[tokio::test]
async fn test_start_during_resolving_inspect_is_refused() {
    let dir = TempDir::new().unwrap();
    let engine = MemoryEngine::manual().with_resolve_delay(Duration::from_millis(10));
    let h = Harness::new(dir.path(), engine.clone());

    let orchestrator = Arc::clone(&h.orchestrator);
    let source = "https://example.com/releases/pending.torrent";
    let inspecting = tokio::spawn(async move { orchestrator.inspect(source).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.registration_count(), 1);

    let result = h.start(source).await;
    assert!(matches!(
        result,
        Err(SessionError::Engine(EngineError::Inspecting(_)))
    ));
    assert!(h.orchestrator.list().await.is_empty());

    // The manual engine never publishes, so the inspection times out
    let inspected = inspecting.await.unwrap();
    assert!(matches!(inspected, Err(SessionError::MetadataTimeout(_))));
    assert_eq!(engine.registration_count(), 0);

    h.start_id(source).await;
}

#[tokio::test]
async fn test_reset_clears_sessions_and_state_file() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    h.start_id(&magnet(HASH_A)).await;
    h.start_id(&magnet(HASH_B)).await;
    h.store.flush().await;
    assert!(h.store.path_for(SESSIONS_KEY).exists());

    h.orchestrator.reset().await.unwrap();
    assert!(h.orchestrator.list().await.is_empty());
    assert_eq!(h.engine.registration_count(), 0);
    assert!(!h.store.path_for(SESSIONS_KEY).exists());
    assert!(!h.orchestrator.power().is_held());
}

#[tokio::test]
async fn test_reset_keeps_sessions_the_engine_failed_to_remove() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let a = h.start_id(&magnet(HASH_A)).await;
    let b = h.start_id(&magnet(HASH_B)).await;
    h.store.flush().await;

    // Sessions are torn down in added order; the first one fails
    h.engine.fail_next_remove();
    let result = h.orchestrator.reset().await;
    assert!(matches!(result, Err(SessionError::Engine(_))));

    let left = h.orchestrator.list().await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, a);
    assert!(h.engine.is_registered(&a));
    assert!(!h.engine.is_registered(&b));

    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_uri, magnet(HASH_A));

    // A second reset finishes the job
    h.orchestrator.reset().await.unwrap();
    assert!(h.orchestrator.list().await.is_empty());
    assert_eq!(h.engine.registration_count(), 0);
    assert!(!h.store.path_for(SESSIONS_KEY).exists());
}

#[tokio::test]
async fn test_ingestion_candidates_tolerate_duplicates() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    h.orchestrator.start_candidate(&magnet(HASH_A)).await;
    h.orchestrator.start_candidate(&magnet(HASH_A)).await;
    h.orchestrator.start_candidate("not a source").await;

    assert_eq!(h.orchestrator.list().await.len(), 1);
}

#[tokio::test]
async fn test_shutdown_flushes_and_stops_accepting() {
    let dir = TempDir::new().unwrap();
    // Long debounce: only the shutdown flush can write in time
    let h = Harness::with_debounce(dir.path(), MemoryEngine::new(), Duration::from_secs(30));

    h.start_id(&magnet(HASH_A)).await;
    assert!(h.orchestrator.power().is_held());

    h.orchestrator.shutdown().await;
    assert_eq!(h.records().len(), 1);
    assert!(!h.orchestrator.power().is_held());
    assert!(h.engine.is_shut_down());

    let late = h.start(&magnet(HASH_B)).await;
    assert!(matches!(late, Err(SessionError::ShuttingDown)));
}

#[tokio::test]
async fn test_limits_are_forwarded_to_engine() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let config = AppConfig {
        download_limit: Some(1024),
        upload_limit: None,
        max_connections: 42,
        ..AppConfig::default()
    };
    h.orchestrator.apply_limits(&config);

    assert_eq!(h.engine.download_limit(), Some(1024));
    assert_eq!(h.engine.upload_limit(), None);
    assert_eq!(h.engine.max_connections(), 42);
}

#[tokio::test]
async fn test_summary_reflects_engine_state() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let a = h.start_id(&magnet(HASH_A)).await;
    let b = h.start_id(&magnet(HASH_B)).await;
    h.engine.set_transfer(&a, 500, 250, 100, 3);
    h.orchestrator.pause(&b).await.unwrap();

    let summary = h.orchestrator.summary().await;
    assert_eq!(summary.stats.session_count, 2);
    assert_eq!(summary.stats.downloaded, 500);

    let first = summary.sessions.iter().find(|s| s.id == a).unwrap();
    assert_eq!(first.progress, 0.5);
    assert_eq!(first.ratio, 0.5);
    assert_eq!(first.num_peers, 3);

    let second = summary.sessions.iter().find(|s| s.id == b).unwrap();
    assert!(second.is_paused);
    assert_eq!(second.download_speed, 0);
}

#[tokio::test]
async fn test_files_report_per_file_progress() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::manual());

    let id = h.start_id(&bare_magnet(HASH_A)).await;
    assert!(h.orchestrator.files(&id).await.unwrap().is_empty());

    h.engine
        .publish_metadata(&id, "season", &[("e01.mkv", 400), ("e02.mkv", 400)]);
    h.engine.set_transfer(&id, 600, 0, 50, 2);

    let files = h.orchestrator.files(&id).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name, "e01.mkv");
    assert_eq!(files[0].size, 400);
    assert_eq!(files[0].progress, 1.0);
    assert_eq!(files[1].progress, 0.5);

    let unknown = ContentId::new(HASH_B);
    assert!(matches!(
        h.orchestrator.files(&unknown).await,
        Err(SessionError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_trackers_listed_and_added() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(dir.path(), MemoryEngine::new());

    let source = format!("{}&tr=udp%3A%2F%2Ftracker.example.org%3A6969", magnet(HASH_A));
    let id = h.start_id(&source).await;
    assert_eq!(
        h.orchestrator.trackers(&id).await.unwrap(),
        vec!["udp://tracker.example.org:6969".to_string()]
    );

    h.orchestrator
        .add_tracker(&id, " https://announce.example.com/announce ")
        .await
        .unwrap();
    let trackers = h.orchestrator.trackers(&id).await.unwrap();
    assert_eq!(trackers.len(), 2);
    assert_eq!(trackers[1], "https://announce.example.com/announce");

    let invalid = h.orchestrator.add_tracker(&id, "ftp://nope.example").await;
    assert!(matches!(invalid, Err(SessionError::InvalidTracker(_))));
    assert_eq!(h.orchestrator.trackers(&id).await.unwrap().len(), 2);

    let unknown = ContentId::new(HASH_C);
    assert!(matches!(
        h.orchestrator.trackers(&unknown).await,
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(
        h.orchestrator
            .add_tracker(&unknown, "udp://tracker.example.org:6969")
            .await,
        Err(SessionError::NotFound(_))
    ));

    // Trackers are not part of the persisted record
    h.store.flush().await;
    assert_eq!(h.records()[0].source_uri, source);
}
