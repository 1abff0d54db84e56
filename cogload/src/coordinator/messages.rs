//! Coordinator request and report types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::domain::{AuditEntry, CommitHistoryEntry, CommitResult, WatchedRepository};
use crate::error::CoordError;
use crate::tracker::{TrackerCounters, TrackerSnapshot};

/// Live view of one repository for `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoReport {
    #[serde(flatten)]
    pub repo: WatchedRepository,
    /// Time left in the open debounce window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_remaining_ms: Option<u64>,
    /// Time left before an `error` repository goes back to watching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
    #[serde(default)]
    pub watch_failed: bool,
    #[serde(default)]
    pub counters: TrackerCounters,
}

/// Result of one forced commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub path: PathBuf,
    #[serde(flatten)]
    pub result: CommitResult,
}

/// What `init` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Initialized { config_created: bool, state_created: bool },
    AlreadyInitialized,
}

/// Requests handled by the coordinator actor
#[derive(Debug)]
pub enum CoordRequest {
    Add {
        path: PathBuf,
        threshold: Option<f64>,
        reply: oneshot::Sender<Result<WatchedRepository, CoordError>>,
    },
    Remove {
        path: PathBuf,
        reply: oneshot::Sender<Result<(), CoordError>>,
    },
    List {
        reply: oneshot::Sender<Vec<WatchedRepository>>,
    },
    Status {
        reply: oneshot::Sender<Vec<RepoReport>>,
    },
    /// Force-commit one repository, or all when `path` is None
    Commit {
        path: Option<PathBuf>,
        reply: oneshot::Sender<Result<Vec<CommitOutcome>, CoordError>>,
    },
    Reset {
        path: PathBuf,
        reply: oneshot::Sender<Result<f64, CoordError>>,
    },
    Pause {
        path: PathBuf,
        reply: oneshot::Sender<Result<(), CoordError>>,
    },
    Resume {
        path: PathBuf,
        reply: oneshot::Sender<Result<(), CoordError>>,
    },
    History {
        path: Option<PathBuf>,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<CommitHistoryEntry>, CoordError>>,
    },
    Audit {
        path: Option<PathBuf>,
        limit: usize,
        reply: oneshot::Sender<Result<Vec<AuditEntry>, CoordError>>,
    },
    /// Snapshot stream for one repository (foreground `watch`)
    Subscribe {
        path: PathBuf,
        reply: oneshot::Sender<Result<watch::Receiver<TrackerSnapshot>, CoordError>>,
    },
    /// Drain every tracker and stop; replies with the final records
    Shutdown {
        reply: oneshot::Sender<Vec<WatchedRepository>>,
    },
}
