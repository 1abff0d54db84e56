//! IPC listener for the daemon side
//!
//! Binds the Unix Domain Socket, reads one request per connection and
//! answers it through the coordinator handle.

use std::path::Path;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{DaemonMessage, DaemonResponse};
use crate::coordinator::CoordinatorHandle;

/// Maximum request size
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Create and bind a Unix Domain Socket listener at `socket_path`
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener_at(socket_path: &Path) -> Result<UnixListener> {
    debug!(?socket_path, "create_listener: creating IPC socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener: socket bound successfully");

    Ok(listener)
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one newline-terminated request
pub async fn read_message(stream: &mut UnixStream) -> Result<DaemonMessage> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC message")?;

    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: {} bytes", bytes_read));
    }

    if line.is_empty() {
        return Err(eyre::eyre!("Empty message received"));
    }

    let msg: DaemonMessage = serde_json::from_str(line.trim()).context("Failed to parse IPC message")?;
    debug!(?msg, "read_message: parsed message");

    Ok(msg)
}

/// Send a response on the stream
pub async fn send_response(stream: &mut UnixStream, response: &DaemonResponse) -> Result<()> {
    let response_json = serde_json::to_string(response).context("Failed to serialize response")?;
    stream
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent response");
    Ok(())
}

/// Answer a request through the coordinator
///
/// `Shutdown` only acknowledges here; stopping the daemon is up to the caller.
pub async fn dispatch(handle: &CoordinatorHandle, msg: DaemonMessage) -> DaemonResponse {
    debug!(?msg, "dispatch: called");
    let result = match msg {
        DaemonMessage::Ping => Ok(DaemonResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
        DaemonMessage::Add { path, threshold } => handle
            .add(&path, threshold)
            .await
            .map(|repo| DaemonResponse::Added { repo }),
        DaemonMessage::Remove { path } => handle.remove(&path).await.map(|_| DaemonResponse::Ok),
        DaemonMessage::List => handle.list().await.map(|repos| DaemonResponse::Repos { repos }),
        DaemonMessage::Status => handle.status().await.map(|reports| DaemonResponse::Status { reports }),
        DaemonMessage::Commit { path } => handle
            .commit(path.as_deref())
            .await
            .map(|outcomes| DaemonResponse::Commits { outcomes }),
        DaemonMessage::Reset { path } => handle
            .reset(&path)
            .await
            .map(|previous_delta| DaemonResponse::Reset { previous_delta }),
        DaemonMessage::Pause { path } => handle.pause(&path).await.map(|_| DaemonResponse::Ok),
        DaemonMessage::Resume { path } => handle.resume(&path).await.map(|_| DaemonResponse::Ok),
        DaemonMessage::History { path, limit } => handle
            .history(path.as_deref(), limit)
            .await
            .map(|entries| DaemonResponse::History { entries }),
        DaemonMessage::Audit { path, limit } => handle
            .audit(path.as_deref(), limit)
            .await
            .map(|entries| DaemonResponse::Audit { entries }),
        DaemonMessage::Shutdown => Ok(DaemonResponse::Ok),
    };
    result.unwrap_or_else(DaemonResponse::from)
}

async fn handle_connection(mut stream: UnixStream, handle: CoordinatorHandle, shutdown_tx: mpsc::Sender<()>) {
    let msg = match read_message(&mut stream).await {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Bad IPC request");
            let response = DaemonResponse::Error {
                kind: "bad_request".to_string(),
                message: format!("{:#}", e),
            };
            let _ = send_response(&mut stream, &response).await;
            return;
        }
    };

    let is_shutdown = msg == DaemonMessage::Shutdown;
    let response = dispatch(&handle, msg).await;
    if let Err(e) = send_response(&mut stream, &response).await {
        warn!(error = %e, "Failed to answer IPC request");
    }
    if is_shutdown {
        info!("Shutdown requested over IPC");
        let _ = shutdown_tx.send(()).await;
    }
}

/// Accept connections until the listener fails; each request gets its own task
pub async fn serve(listener: UnixListener, handle: CoordinatorHandle, shutdown_tx: mpsc::Sender<()>) {
    info!("IPC server listening");
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_connection(stream, handle.clone(), shutdown_tx.clone()));
            }
            Err(e) => {
                warn!(error = %e, "IPC accept failed");
                return;
            }
        }
    }
}
