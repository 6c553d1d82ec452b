//! IPC server implementation
//!
//! Listens on localhost TCP for requests from the CLI.
//! Uses TCP on 127.0.0.1 for cross-platform compatibility (works on Unix, macOS, Windows).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use mg_core::error::ErrorKind;
use mg_core::ipc::{DaemonStatus, IpcEvent, IpcMessage, IpcRequest, IpcResponse, Summary};
use mg_core::types::{DesiredState, StartOptions, StartOutcome};

use crate::state::DaemonState;

/// Cadence of summary pushes to watching clients
pub const SUMMARY_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// IPC server for CLI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    state: Arc<DaemonState>,
    /// Cancelled by a `shutdown` request
    shutdown_token: Option<CancellationToken>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(address: String, state: Arc<DaemonState>) -> Self {
        Self {
            address,
            state,
            shutdown_token: None,
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))
    }

    /// Bind and serve until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, cancel).await;
        Ok(())
    }

    /// Accept clients on an already bound listener until `cancel` fires
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) {
        tracing::info!("IPC server listening on {}", self.address);

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    // Only accept connections from localhost
                    if !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }

                    let state = Arc::clone(&self.state);
                    let shutdown_token = self.shutdown_token.clone();
                    let cancel = cancel.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state, shutdown_token, cancel).await
                        {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                }
            }
        }

        tracing::debug!("IPC server stopped");
    }
}

/// State for a single IPC client connection
struct ClientState {
    /// Receives pushes after a `watch` request
    watching: bool,
    /// Last summary pushed, to skip unchanged pushes
    last_summary: Option<Summary>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            watching: false,
            last_summary: None,
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<DaemonState>,
    shutdown_token: Option<CancellationToken>,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut client_state = ClientState::new();

    let mut event_rx = state.orchestrator.subscribe();
    let mut push_timer = tokio::time::interval(SUMMARY_PUSH_INTERVAL);
    push_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            // Handle incoming requests
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            line.clear();
                            continue;
                        }

                        let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                            Ok(request) => handle_request_with_state(
                                request,
                                &state,
                                &mut client_state,
                                shutdown_token.as_ref(),
                            ).await,
                            Err(e) => IpcResponse::error(
                                ErrorKind::InvalidRequest,
                                format!("Invalid request: {}", e),
                            ),
                        };

                        write_message(&mut writer, response.into()).await?;
                        line.clear();
                    }
                    Err(e) => {
                        return Err(e.into());
                    }
                }
            }

            // Forward session events to watching clients
            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        if client_state.watching {
                            write_message(&mut writer, IpcEvent::Session(event).into()).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("IPC client lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }

            // Throttled summary push, only when something changed
            _ = push_timer.tick(), if client_state.watching => {
                let summary = state.orchestrator.summary().await;
                if client_state.last_summary.as_ref() != Some(&summary) {
                    client_state.last_summary = Some(summary.clone());
                    write_message(&mut writer, IpcEvent::Summary(summary).into()).await?;
                }
            }
        }
    }

    Ok(())
}

async fn write_message(writer: &mut OwnedWriteHalf, message: IpcMessage) -> Result<()> {
    let mut bytes = message.to_bytes()?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    Ok(())
}

async fn handle_request_with_state(
    request: IpcRequest,
    state: &DaemonState,
    client_state: &mut ClientState,
    shutdown_token: Option<&CancellationToken>,
) -> IpcResponse {
    // Handle watch requests that modify client state
    match &request {
        IpcRequest::Watch => {
            client_state.watching = true;
            client_state.last_summary = None;
            tracing::debug!("Client started watching");
            return IpcResponse::Ok;
        }
        IpcRequest::Unwatch => {
            client_state.watching = false;
            tracing::debug!("Client stopped watching");
            return IpcResponse::Ok;
        }
        _ => {}
    }

    // Handle all other requests
    handle_request(request, state, shutdown_token).await
}

async fn handle_request(
    request: IpcRequest,
    state: &DaemonState,
    shutdown_token: Option<&CancellationToken>,
) -> IpcResponse {
    let orchestrator = &state.orchestrator;

    match request {
        IpcRequest::GetStatus => {
            let (session_count, active_count) = orchestrator.counts().await;

            IpcResponse::Status(DaemonStatus {
                running: true,
                uptime_secs: state.start_time.elapsed().as_secs(),
                session_count,
                active_count,
                version: env!("CARGO_PKG_VERSION").to_string(),
                ipc_address: state.ipc_address.clone(),
                state_dir: orchestrator.store().dir().to_path_buf(),
                watching: state.ingestion.watching(),
                feed_count: state.ingestion.feed_count(),
            })
        }

        IpcRequest::GetSummary => IpcResponse::Summary(orchestrator.summary().await),

        IpcRequest::Start {
            source,
            path,
            paused,
        } => {
            let options = StartOptions {
                path,
                desired_state: if paused {
                    DesiredState::Paused
                } else {
                    DesiredState::Active
                },
                ..StartOptions::default()
            };

            match orchestrator.start(&source, options).await {
                Ok(StartOutcome::Started { id }) => IpcResponse::Started { id },
                Ok(StartOutcome::Duplicate) => IpcResponse::Duplicate,
                Err(e) => IpcResponse::error(e.kind(), e.to_string()),
            }
        }

        IpcRequest::Inspect { source } => match orchestrator.inspect(&source).await {
            Ok(metadata) => IpcResponse::Metadata(metadata),
            Err(e) => IpcResponse::error(e.kind(), e.to_string()),
        },

        IpcRequest::Pause { id } => match orchestrator.pause(&id).await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::error(e.kind(), e.to_string()),
        },

        IpcRequest::Resume { id } => match orchestrator.resume(&id).await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::error(e.kind(), e.to_string()),
        },

        IpcRequest::Remove { id, delete_files } => {
            match orchestrator.remove(&id, delete_files).await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::error(e.kind(), e.to_string()),
            }
        }

        IpcRequest::Files { id } => match orchestrator.files(&id).await {
            Ok(files) => IpcResponse::Files { files },
            Err(e) => IpcResponse::error(e.kind(), e.to_string()),
        },

        IpcRequest::Trackers { id } => match orchestrator.trackers(&id).await {
            Ok(trackers) => IpcResponse::Trackers { trackers },
            Err(e) => IpcResponse::error(e.kind(), e.to_string()),
        },

        IpcRequest::AddTracker { id, url } => match orchestrator.add_tracker(&id, &url).await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::error(e.kind(), e.to_string()),
        },

        IpcRequest::GetConfig => IpcResponse::Config(state.config().get()),

        IpcRequest::SetConfig { patch } => {
            let updated = state.config().apply(&patch);
            orchestrator.apply_limits(&updated);
            if patch.touches_ingestion() {
                state.ingestion.reconfigure(&updated);
            }
            tracing::info!("Configuration updated via IPC");
            IpcResponse::Config(updated)
        }

        IpcRequest::Reset => match orchestrator.reset().await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::error(e.kind(), e.to_string()),
        },

        // Watch/Unwatch are handled in handle_request_with_state
        IpcRequest::Watch | IpcRequest::Unwatch => IpcResponse::Ok,

        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested via IPC");
            if let Some(token) = shutdown_token {
                token.cancel();
                IpcResponse::Ok
            } else {
                IpcResponse::Error {
                    kind: None,
                    message: "Shutdown not supported (no shutdown token configured)".to_string(),
                }
            }
        }
    }
}
