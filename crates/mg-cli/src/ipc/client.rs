//! IPC client for communicating with the daemon
//!
//! One connection carries requests and, after `watch`, pushed events. Lines
//! tagged with `event` are skipped while a response is awaited, so a watching
//! client can still issue requests.

use std::io;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use mg_core::config::{AppConfig, ConfigPatch};
use mg_core::ipc::{
    default_ipc_address, DaemonStatus, IpcEvent, IpcMessage, IpcRequest, IpcResponse, Summary,
};
use mg_core::types::{ContentId, ContentMetadata, FileEntry, StartOutcome};

/// Length of a full hex content id
const FULL_ID_LEN: usize = 40;

/// Client for communicating with the magnetar daemon
pub struct DaemonClient {
    address: String,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl DaemonClient {
    /// Create a new client with default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with custom address
    pub fn with_address(address: String) -> Self {
        Self {
            address,
            reader: None,
            writer: None,
        }
    }

    /// Get the address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect to the daemon
    pub async fn connect(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to daemon at {}", self.address);

        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to daemon at {}. Is it running?",
                self.address
            )
        })?;

        let (reader, writer) = stream.into_split();
        self.reader = Some(BufReader::new(reader));
        self.writer = Some(writer);
        Ok(())
    }

    /// Check if the daemon is running
    pub async fn ping(&mut self) -> Result<bool> {
        self.connect().await?;

        match self.send_request(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            _ => Ok(false),
        }
    }

    /// Get daemon status
    pub async fn status(&mut self) -> Result<DaemonStatus> {
        self.connect().await?;

        match self.send_request(IpcRequest::GetStatus).await? {
            IpcResponse::Status(status) => Ok(status),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Get the session summary
    pub async fn summary(&mut self) -> Result<Summary> {
        self.connect().await?;

        match self.send_request(IpcRequest::GetSummary).await? {
            IpcResponse::Summary(summary) => Ok(summary),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Start a session for a magnet link, URL or local file
    pub async fn start(
        &mut self,
        source: &str,
        path: Option<std::path::PathBuf>,
        paused: bool,
    ) -> Result<StartOutcome> {
        self.connect().await?;

        let request = IpcRequest::Start {
            source: source.to_string(),
            path,
            paused,
        };

        match self.send_request(request).await? {
            IpcResponse::Started { id } => Ok(StartOutcome::Started { id }),
            IpcResponse::Duplicate => Ok(StartOutcome::Duplicate),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Resolve metadata without creating a session
    pub async fn inspect(&mut self, source: &str) -> Result<ContentMetadata> {
        self.connect().await?;

        let request = IpcRequest::Inspect {
            source: source.to_string(),
        };

        match self.send_request(request).await? {
            IpcResponse::Metadata(metadata) => Ok(metadata),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    pub async fn pause(&mut self, id: &ContentId) -> Result<()> {
        self.connect().await?;
        self.expect_ok(IpcRequest::Pause { id: id.clone() }).await
    }

    pub async fn resume(&mut self, id: &ContentId) -> Result<()> {
        self.connect().await?;
        self.expect_ok(IpcRequest::Resume { id: id.clone() }).await
    }

    /// Remove a session, optionally deleting downloaded files
    pub async fn remove(&mut self, id: &ContentId, delete_files: bool) -> Result<()> {
        self.connect().await?;

        let request = IpcRequest::Remove {
            id: id.clone(),
            delete_files,
        };
        self.expect_ok(request).await
    }

    /// Files of a session with per-file progress
    pub async fn files(&mut self, id: &ContentId) -> Result<Vec<FileEntry>> {
        self.connect().await?;

        match self.send_request(IpcRequest::Files { id: id.clone() }).await? {
            IpcResponse::Files { files } => Ok(files),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Tracker announce URLs of a session
    pub async fn trackers(&mut self, id: &ContentId) -> Result<Vec<String>> {
        self.connect().await?;

        match self.send_request(IpcRequest::Trackers { id: id.clone() }).await? {
            IpcResponse::Trackers { trackers } => Ok(trackers),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    pub async fn add_tracker(&mut self, id: &ContentId, url: &str) -> Result<()> {
        self.connect().await?;

        let request = IpcRequest::AddTracker {
            id: id.clone(),
            url: url.to_string(),
        };
        self.expect_ok(request).await
    }

    /// Get the daemon's live configuration
    pub async fn get_config(&mut self) -> Result<AppConfig> {
        self.connect().await?;

        match self.send_request(IpcRequest::GetConfig).await? {
            IpcResponse::Config(config) => Ok(config),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Apply a partial configuration, returning the merged result
    pub async fn set_config(&mut self, patch: ConfigPatch) -> Result<AppConfig> {
        self.connect().await?;

        match self.send_request(IpcRequest::SetConfig { patch }).await? {
            IpcResponse::Config(config) => Ok(config),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Start receiving events on this connection
    pub async fn watch(&mut self) -> Result<()> {
        self.connect().await?;
        self.expect_ok(IpcRequest::Watch).await
    }

    /// Tear down every session and forget persisted state
    pub async fn reset(&mut self) -> Result<()> {
        self.connect().await?;
        self.expect_ok(IpcRequest::Reset).await
    }

    /// Request daemon shutdown
    pub async fn shutdown(&mut self) -> Result<()> {
        self.connect().await?;
        self.expect_ok(IpcRequest::Shutdown).await
    }

    /// Resolve a full id or a unique id prefix against the daemon's sessions
    pub async fn resolve_id(&mut self, input: &str) -> Result<ContentId> {
        let needle = input.trim().to_ascii_lowercase();
        if needle.len() == FULL_ID_LEN {
            return Ok(ContentId::new(needle));
        }
        if needle.is_empty() {
            anyhow::bail!("Session id cannot be empty");
        }

        let summary = self.summary().await?;
        let mut matches = summary
            .sessions
            .into_iter()
            .filter(|s| s.id.as_str().starts_with(&needle))
            .map(|s| s.id);

        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id),
            (None, _) => anyhow::bail!("No session matches '{}'", input),
            (Some(_), Some(_)) => {
                anyhow::bail!("Session id '{}' is ambiguous, use more characters", input)
            }
        }
    }

    /// Wait for the next pushed event; `None` once the daemon hangs up
    pub async fn next_event(&mut self) -> Result<Option<IpcEvent>> {
        loop {
            match self.read_message().await? {
                Some(IpcMessage::Event(event)) => return Ok(Some(event)),
                Some(IpcMessage::Response(response)) => {
                    tracing::debug!("Ignoring unsolicited response: {:?}", response);
                }
                None => return Ok(None),
            }
        }
    }

    async fn expect_ok(&mut self, request: IpcRequest) -> Result<()> {
        match self.send_request(request).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Send a request and wait for its response, skipping pushed events
    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        let mut json = serde_json::to_vec(&request)?;
        json.push(b'\n');
        writer.write_all(&json).await?;
        writer.flush().await?;

        loop {
            match self.read_message().await? {
                Some(IpcMessage::Response(response)) => return Ok(response),
                Some(IpcMessage::Event(event)) => {
                    tracing::trace!("Skipping event while awaiting response: {:?}", event);
                }
                None => anyhow::bail!("Daemon closed the connection"),
            }
        }
    }

    async fn read_message(&mut self) -> Result<Option<IpcMessage>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let message = serde_json::from_str(trimmed)
                .with_context(|| format!("Malformed message from daemon: {}", trimmed))?;
            return Ok(Some(message));
        }
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an error means no daemon is listening
pub fn is_not_running(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .map(|e| e.kind() == io::ErrorKind::ConnectionRefused)
            .unwrap_or(false)
    })
}
