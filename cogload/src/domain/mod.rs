//! Domain records: watched repositories, commit history, audit events

mod history;
mod repository;

pub use history::{AuditAction, AuditEntry, CommitHistoryEntry, CommitResult, TriggerReason};
pub use repository::{RepoStatus, WatchedRepository, paths_overlap};
