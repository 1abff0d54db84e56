//! Commit history and audit records
//!
//! Both are append-only: entries are written once and only ever read back
//! for display.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a commit was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// The cumulative delta reached the repository threshold
    ThresholdExceeded,
    /// The user asked for a commit
    ManualForce,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::ThresholdExceeded => "threshold_exceeded",
            TriggerReason::ManualForce => "manual_force",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a commit attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommitResult {
    /// A commit was created
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit_id: Option<String>,
    },
    /// Working tree was clean, nothing committed
    NoChanges,
    /// The VCS refused or errored
    Failed { error: String },
}

impl CommitResult {
    pub fn success() -> Self {
        CommitResult::Success { commit_id: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        CommitResult::Failed { error: error.into() }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CommitResult::Failed { .. })
    }

    /// Whether the cumulative delta should be reset after this outcome
    ///
    /// `no_changes` resets too: the complexity was already captured by a
    /// prior commit or the estimate was a false positive.
    pub fn resets_delta(&self) -> bool {
        !self.is_failed()
    }

    /// Failure message, if this outcome failed
    pub fn error(&self) -> Option<&str> {
        match self {
            CommitResult::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommitResult::Success { .. } => "success",
            CommitResult::NoChanges => "no_changes",
            CommitResult::Failed { .. } => "failed",
        }
    }
}

/// One commit attempt, as recorded in `history.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitHistoryEntry {
    pub id: String,
    pub repo_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub delta_at_commit: f64,
    pub threshold: f64,
    pub trigger_reason: TriggerReason,
    #[serde(flatten)]
    pub result: CommitResult,
}

impl CommitHistoryEntry {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        delta_at_commit: f64,
        threshold: f64,
        trigger_reason: TriggerReason,
        result: CommitResult,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            repo_path: repo_path.into(),
            timestamp: Utc::now(),
            delta_at_commit,
            threshold,
            trigger_reason,
            result,
        }
    }
}

/// Control actions recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Added,
    Removed,
    Reset,
    Paused,
    Resumed,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Added => "added",
            AuditAction::Removed => "removed",
            AuditAction::Reset => "reset",
            AuditAction::Paused => "paused",
            AuditAction::Resumed => "resumed",
        };
        f.write_str(s)
    }
}

/// Non-commit control event, as recorded in `audit.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub repo_path: PathBuf,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_delta: Option<f64>,
}

impl AuditEntry {
    pub fn new(repo_path: impl Into<PathBuf>, action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            repo_path: repo_path.into(),
            action,
            previous_delta: None,
        }
    }

    pub fn with_previous_delta(mut self, delta: f64) -> Self {
        self.previous_delta = Some(delta);
        self
    }
}
