//! IPC message types for daemon communication
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::coordinator::{CommitOutcome, RepoReport};
use crate::domain::{AuditEntry, CommitHistoryEntry, WatchedRepository};
use crate::error::CoordError;

/// Messages from the CLI to the daemon
///
/// Paths are absolute; the daemon's working directory is unrelated to the caller's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonMessage {
    /// Ping to check if daemon is alive
    Ping,

    Add {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
    },

    Remove { path: PathBuf },

    List,

    Status,

    /// Force-commit one repository, or all when `path` is absent
    Commit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },

    Reset { path: PathBuf },

    Pause { path: PathBuf },

    Resume { path: PathBuf },

    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        limit: usize,
    },

    Audit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        limit: usize,
    },

    /// Request daemon to stop gracefully
    Shutdown,
}

/// Responses from the daemon to the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonResponse {
    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String },

    Added { repo: WatchedRepository },

    Repos { repos: Vec<WatchedRepository> },

    Status { reports: Vec<RepoReport> },

    Commits { outcomes: Vec<CommitOutcome> },

    Reset { previous_delta: f64 },

    History { entries: Vec<CommitHistoryEntry> },

    Audit { entries: Vec<AuditEntry> },

    /// Error response; `kind` mirrors `CoordError::kind`
    Error { kind: String, message: String },
}

impl From<CoordError> for DaemonResponse {
    fn from(err: CoordError) -> Self {
        DaemonResponse::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
