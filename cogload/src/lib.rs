//! cogload - Complexity Daemon
//!
//! Watches one or more git repositories, accumulates a per-repository
//! complexity delta as files change, and commits automatically once the
//! accumulated delta crosses a threshold.
//!
//! # Modules
//!
//! - [`watcher`] - Filesystem event source and ignore rules
//! - [`estimator`] - Per-file complexity delta estimation
//! - [`tracker`] - Per-repository debounce and threshold state machine
//! - [`vcs`] - Commit trigger backed by git
//! - [`coordinator`] - Owns every watched repository and the control operations
//! - [`state`] - Persistence actor for repositories, history and audit records
//! - [`ipc`] - Unix socket protocol between the CLI and the daemon
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod estimator;
pub mod ipc;
pub mod state;
pub mod tracker;
pub mod vcs;
pub mod watcher;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Collaborators, CommitOutcome, Coordinator, CoordinatorHandle, InitOutcome, RepoReport};
pub use domain::{AuditAction, AuditEntry, CommitHistoryEntry, CommitResult, RepoStatus, TriggerReason, WatchedRepository};
pub use error::CoordError;
pub use estimator::DeltaEstimator;
pub use state::{StateError, StateManager};
pub use tracker::{TrackerHandle, TrackerSnapshot};
pub use vcs::{CommitRequest, CommitTrigger, GitCommitTrigger};
pub use watcher::{ChangeKind, EventSource, FileEvent, Subscription, WatchEvent};
