//! Daemon bootstrap and coordinated shutdown
//!
//! Startup order: instance lock, config, store, engine, orchestrator, engine
//! event loop, restore (awaited), rate limits, ingestion, IPC.
//!
//! Shutdown order once `cancel` fires: stop ingestion, stop the relay and the
//! IPC server, flush persistence and shut the engine down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use mg_core::config::ConfigHandle;
use mg_core::instance::InstanceLock;
use mg_core::ipc::SessionEvent;
use mg_core::store::PersistentStore;

use crate::engine::MemoryEngine;
use crate::ingest::{spawn_relay, Ingestion};
use crate::ipc::IpcServer;
use crate::session::SessionOrchestrator;
use crate::state::DaemonState;

/// Settings resolved from the command line
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
    pub pid_path: PathBuf,
    /// Overrides the configured IPC port
    pub port: Option<u16>,
    /// Let the in-memory engine advance transfers at this rate (bytes/s)
    pub simulate_rate: Option<u64>,
}

/// Run the daemon until `cancel` fires
pub async fn run(options: DaemonOptions, cancel: CancellationToken) -> Result<()> {
    let _lock = InstanceLock::acquire(options.pid_path.clone())
        .with_context(|| format!("Cannot acquire instance lock {:?}", options.pid_path))?;

    let config = Arc::new(ConfigHandle::load(options.config_path.clone()));
    let settings = config.get();
    let address = match options.port {
        Some(port) => format!("127.0.0.1:{}", port),
        None => settings.ipc_address(),
    };

    let store = PersistentStore::new(settings.state_dir.clone(), settings.persist_debounce);
    tracing::info!("State directory: {:?}", store.dir());

    let engine = MemoryEngine::new();
    if let Some(rate) = options.simulate_rate {
        tracing::info!("Simulating transfers at {} B/s", rate);
        engine.simulate_transfers(rate);
    }

    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::new(engine),
        store.clone(),
        Arc::clone(&config),
    ));

    // Stops the background tasks after the user-facing token has fired
    let internal = CancellationToken::new();
    tokio::spawn(Arc::clone(&orchestrator).run_engine_events(internal.clone()));

    let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
    let ingestion = Arc::new(Ingestion::new(store, candidate_tx));
    let state = Arc::new(DaemonState::new(
        Arc::clone(&orchestrator),
        Arc::clone(&ingestion),
        address.clone(),
    ));

    // Bind early so a port clash fails before any session is restored
    let server = IpcServer::new(address, Arc::clone(&state)).with_shutdown_token(cancel.clone());
    let listener = server.bind().await?;

    let report = orchestrator.restore().await;
    if report.attempted > 0 {
        tracing::info!(
            "Restored {}/{} sessions ({} failed)",
            report.restored,
            report.attempted,
            report.failed
        );
    }

    orchestrator.apply_limits(&settings);
    ingestion.reconfigure(&settings);
    let relay = spawn_relay(Arc::clone(&orchestrator), candidate_rx, internal.clone());
    tokio::spawn(completion_notices(Arc::clone(&orchestrator), internal.clone()));

    let server_cancel = internal.clone();
    let server_task = tokio::spawn(async move { server.serve(listener, server_cancel).await });

    tracing::info!("magnetar daemon ready");
    cancel.cancelled().await;
    tracing::info!("Shutting down...");

    ingestion.stop().await;
    internal.cancel();
    if let Err(e) = relay.await {
        tracing::warn!("Ingestion relay ended abnormally: {}", e);
    }
    if let Err(e) = server_task.await {
        tracing::warn!("IPC server ended abnormally: {}", e);
    }
    orchestrator.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
pub fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}

/// Log a completion notice per finished session when enabled
async fn completion_notices(orchestrator: Arc<SessionOrchestrator>, cancel: CancellationToken) {
    let mut events = orchestrator.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(SessionEvent::Completed { id }) => {
                if !orchestrator.config().get().notify_on_complete {
                    continue;
                }
                if let Some(session) = orchestrator.get(&id).await {
                    tracing::info!(
                        "Download complete: {} ({:?})",
                        id.short(),
                        session.destination
                    );
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
