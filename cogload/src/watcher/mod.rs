//! Event source
//!
//! Turns OS filesystem notifications into `WatchEvent`s on an unbounded
//! channel, one subscription per repository. Trackers only ever see this
//! channel, so tests drive them with a hand-fed sender instead of a real
//! watcher.

mod ignore;
mod notify_source;

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use ignore::IgnoreMatcher;
pub use notify_source::NotifyEventSource;

/// Normalised kind of a filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
        };
        f.write_str(s)
    }
}

/// A single file change inside a watched repository
#[derive(Debug, Clone, PartialEq)]
pub struct FileEvent {
    pub repo_path: PathBuf,
    pub file_path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(repo_path: impl Into<PathBuf>, file_path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            repo_path: repo_path.into(),
            file_path: file_path.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// What a subscription delivers to its tracker
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Change(FileEvent),
    /// The OS watcher failed; the repository moves to `error`
    Error { message: String },
}

/// Errors from creating a subscription
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Repository root {0} does not exist")]
    RepositoryMissing(PathBuf),

    #[error("Failed to watch {path}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Keeps a subscription alive; dropping it stops the OS watcher
pub struct Subscription {
    _guard: Box<dyn Any + Send + Sync>,
}

impl Subscription {
    pub fn new(guard: impl Any + Send + Sync) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Backend that can watch a repository recursively
pub trait EventSource: Send + Sync {
    /// Start delivering events for `repo` into `sink`
    fn subscribe(&self, repo: &Path, sink: mpsc::UnboundedSender<WatchEvent>) -> Result<Subscription, WatchError>;
}
