//! Tracker control messages and published snapshots

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::{CommitResult, RepoStatus, WatchedRepository};

/// Control requests handled by a tracker task, in arrival order
#[derive(Debug)]
pub enum TrackerInput {
    /// Commit now with `manual_force`, bypassing the threshold
    ForceCommit { reply: oneshot::Sender<CommitResult> },

    /// Zero the cumulative delta; replies with the previous value
    Reset { reply: oneshot::Sender<f64> },

    /// Stop accumulating; replies with the blocking status on refusal
    Pause {
        reply: oneshot::Sender<Result<(), RepoStatus>>,
    },

    Resume {
        reply: oneshot::Sender<Result<(), RepoStatus>>,
    },

    /// The coordinator re-established a failed subscription
    WatchRestored,

    /// Final evaluation, persist, then exit with the final record
    Shutdown {
        reply: oneshot::Sender<WatchedRepository>,
    },

    /// Exit immediately without persisting (repository removed)
    Stop { reply: oneshot::Sender<()> },
}

/// Live counters kept by each tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerCounters {
    pub events_seen: u64,
    pub events_ignored: u64,
    pub evaluations: u64,
    pub commit_attempts: u64,
}

/// Latest view of a tracker, published after every step
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    pub repo: WatchedRepository,
    pub debounce_deadline: Option<Instant>,
    pub retry_deadline: Option<Instant>,
    /// The OS subscription failed and has not been re-established
    pub watch_failed: bool,
    pub counters: TrackerCounters,
}

impl TrackerSnapshot {
    pub fn new(repo: WatchedRepository) -> Self {
        Self {
            repo,
            debounce_deadline: None,
            retry_deadline: None,
            watch_failed: false,
            counters: TrackerCounters::default(),
        }
    }

    pub fn status(&self) -> RepoStatus {
        self.repo.status
    }
}
