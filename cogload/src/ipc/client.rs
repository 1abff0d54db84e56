//! IPC client for communicating with the daemon
//!
//! Every CLI command that has a daemon to talk to goes through here.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::messages::{DaemonMessage, DaemonResponse};

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for communicating with the daemon via IPC
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("DaemonClient: pinging daemon");
        match self.request(DaemonMessage::Ping).await? {
            DaemonResponse::Pong { version } => Ok(version),
            DaemonResponse::Error { message, .. } => Err(eyre::eyre!("Daemon error: {}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// True if a daemon answers on the socket
    pub async fn is_alive(&self) -> bool {
        self.socket_exists() && self.ping().await.is_ok()
    }

    /// Request daemon to shutdown gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("DaemonClient: requesting daemon shutdown");
        match self.request(DaemonMessage::Shutdown).await? {
            DaemonResponse::Ok => Ok(()),
            DaemonResponse::Error { message, .. } => Err(eyre::eyre!("Daemon error: {}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Send a message to the daemon and wait for its response
    pub async fn request(&self, msg: DaemonMessage) -> Result<DaemonResponse> {
        debug!(?self.socket_path, ?msg, "DaemonClient: sending message");

        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")?;

        self.send_on_stream(stream, msg).await
    }

    async fn send_on_stream(&self, mut stream: UnixStream, msg: DaemonMessage) -> Result<DaemonResponse> {
        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new(&mut stream);
        let mut response_line = String::new();

        tokio::time::timeout(self.timeout, reader.read_line(&mut response_line))
            .await
            .context("Read timeout")?
            .context("Failed to read response")?;

        let response: DaemonResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse daemon response")?;

        debug!(?response, "DaemonClient: received response");
        Ok(response)
    }
}
