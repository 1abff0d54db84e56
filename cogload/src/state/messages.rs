//! State manager messages
//!
//! Commands and responses for the actor pattern.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{AuditEntry, CommitHistoryEntry, WatchedRepository};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State directory {0} is locked by another cogload process (is the daemon running?)")]
    Locked(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error in {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    #[error("Channel error")]
    ChannelError,
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        StateError::Serialization {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Repository records
    LoadRepos {
        reply: oneshot::Sender<StateResponse<Vec<WatchedRepository>>>,
    },
    UpsertRepo {
        repo: WatchedRepository,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    RemoveRepo {
        path: PathBuf,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // Commit history
    AppendHistory {
        entry: CommitHistoryEntry,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ReadHistory {
        repo_filter: Option<PathBuf>,
        limit: usize,
        reply: oneshot::Sender<StateResponse<Vec<CommitHistoryEntry>>>,
    },

    // Audit log
    AppendAudit {
        entry: AuditEntry,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    ReadAudit {
        repo_filter: Option<PathBuf>,
        limit: usize,
        reply: oneshot::Sender<StateResponse<Vec<AuditEntry>>>,
    },

    // Shutdown; replies once the store (and its lock) has been dropped
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
