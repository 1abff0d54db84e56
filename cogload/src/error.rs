//! Error types for coordinator operations

use std::path::PathBuf;

use thiserror::Error;

use crate::state::StateError;

/// Errors returned by control operations (`add`, `remove`, `reset`, ...)
///
/// Every variant names the repository involved so the CLI can print it
/// verbatim.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Not a valid repository: {path} ({reason})")]
    InvalidRepository { path: PathBuf, reason: String },

    #[error("Repository already watched: {0}")]
    DuplicateRepository(PathBuf),

    #[error("Repository {path} overlaps already watched repository {existing}")]
    NestedRepository { path: PathBuf, existing: PathBuf },

    #[error("Repository not watched: {0}")]
    NotWatched(PathBuf),

    #[error("Invalid threshold {0}: must be a positive number")]
    InvalidThreshold(f64),

    #[error("Cannot {action} {path} while it is {status}")]
    InvalidState {
        path: PathBuf,
        action: &'static str,
        status: crate::domain::RepoStatus,
    },

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Coordinator channel closed")]
    ChannelClosed,
}

impl CoordError {
    /// Short machine-readable kind, used in IPC error responses
    pub fn kind(&self) -> &'static str {
        match self {
            CoordError::InvalidRepository { .. } => "invalid_repository",
            CoordError::DuplicateRepository(_) => "duplicate_repository",
            CoordError::NestedRepository { .. } => "nested_repository",
            CoordError::NotWatched(_) => "not_watched",
            CoordError::InvalidThreshold(_) => "invalid_threshold",
            CoordError::InvalidState { .. } => "invalid_state",
            CoordError::State(_) => "state",
            CoordError::ChannelClosed => "channel_closed",
        }
    }
}
