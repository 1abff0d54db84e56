//! WatchedRepository record and its status state machine

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle status of a watched repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    /// Receiving events, nothing pending
    #[default]
    Watching,
    /// Debounce window armed, waiting for the burst to settle
    Debouncing,
    /// Commit in progress
    Committing,
    /// Last watch or commit attempt failed; waiting for backoff
    Error,
    /// Events are ignored until resumed
    Paused,
}

impl RepoStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Normal cycle is `watching -> debouncing -> committing -> watching`.
    /// Failures go through `error` and come back to `watching`. A manual
    /// force-commit may start from any non-committing state, and a commit
    /// forced while paused returns to `paused`.
    pub fn can_transition_to(self, next: RepoStatus) -> bool {
        use RepoStatus::*;
        matches!(
            (self, next),
            (Watching, Debouncing | Committing | Error | Paused)
                | (Debouncing, Debouncing | Watching | Committing | Error | Paused)
                | (Committing, Watching | Error | Paused)
                | (Error, Error | Watching | Committing | Paused)
                | (Paused, Watching | Committing)
        )
    }

    /// Status to restore after a daemon restart
    ///
    /// In-flight states do not survive the process; `paused` is a user choice and does.
    pub fn restored(self) -> RepoStatus {
        match self {
            RepoStatus::Paused => RepoStatus::Paused,
            _ => RepoStatus::Watching,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Watching => "watching",
            RepoStatus::Debouncing => "debouncing",
            RepoStatus::Committing => "committing",
            RepoStatus::Error => "error",
            RepoStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository registered with the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedRepository {
    /// Canonical absolute path to the repository root
    pub path: PathBuf,

    /// Cumulative delta at which an automatic commit is triggered
    pub threshold: f64,

    /// Running sum of deltas since the last commit or reset
    #[serde(default)]
    pub cumulative_delta: f64,

    /// Time of the most recently observed filesystem event
    #[serde(default)]
    pub last_event_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: RepoStatus,

    /// Latest watcher or commit failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub added_at: DateTime<Utc>,
}

impl WatchedRepository {
    /// Create a freshly registered repository in `watching` state
    pub fn new(path: impl Into<PathBuf>, threshold: f64) -> Self {
        let path = path.into();
        debug!(path = %path.display(), threshold, "WatchedRepository::new: called");
        Self {
            path,
            threshold,
            cumulative_delta: 0.0,
            last_event_time: None,
            status: RepoStatus::Watching,
            last_error: None,
            added_at: Utc::now(),
        }
    }

    /// Whether the accumulated delta has reached the threshold
    ///
    /// Only upward crossings count; a negative total never triggers.
    pub fn threshold_reached(&self) -> bool {
        self.cumulative_delta >= self.threshold
    }
}

/// True when one path equals or is nested inside the other (component-wise)
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_repository_defaults() {
        let repo = WatchedRepository::new("/tmp/repoA", 10.0);
        assert_eq!(repo.cumulative_delta, 0.0);
        assert_eq!(repo.status, RepoStatus::Watching);
        assert!(repo.last_event_time.is_none());
        assert!(repo.last_error.is_none());
    }

    #[test]
    fn test_normal_cycle_transitions() {
        assert!(RepoStatus::Watching.can_transition_to(RepoStatus::Debouncing));
        assert!(RepoStatus::Debouncing.can_transition_to(RepoStatus::Committing));
        assert!(RepoStatus::Committing.can_transition_to(RepoStatus::Watching));
        assert!(RepoStatus::Debouncing.can_transition_to(RepoStatus::Watching));
    }

    #[test]
    fn test_error_and_pause_transitions() {
        assert!(RepoStatus::Committing.can_transition_to(RepoStatus::Error));
        assert!(RepoStatus::Error.can_transition_to(RepoStatus::Watching));
        assert!(RepoStatus::Watching.can_transition_to(RepoStatus::Paused));
        assert!(RepoStatus::Paused.can_transition_to(RepoStatus::Watching));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!RepoStatus::Paused.can_transition_to(RepoStatus::Debouncing));
        assert!(!RepoStatus::Committing.can_transition_to(RepoStatus::Committing));
        assert!(!RepoStatus::Committing.can_transition_to(RepoStatus::Debouncing));
        assert!(!RepoStatus::Paused.can_transition_to(RepoStatus::Error));
    }

    #[test]
    fn test_restored_status() {
        assert_eq!(RepoStatus::Committing.restored(), RepoStatus::Watching);
        assert_eq!(RepoStatus::Debouncing.restored(), RepoStatus::Watching);
        assert_eq!(RepoStatus::Error.restored(), RepoStatus::Watching);
        assert_eq!(RepoStatus::Paused.restored(), RepoStatus::Paused);
    }

    #[test]
    fn test_threshold_reached_is_upward_only() {
        let mut repo = WatchedRepository::new("/tmp/repoA", 10.0);
        repo.cumulative_delta = 9.99;
        assert!(!repo.threshold_reached());
        repo.cumulative_delta = 10.0;
        assert!(repo.threshold_reached());
        repo.cumulative_delta = -50.0;
        assert!(!repo.threshold_reached());
    }

    #[test]
    fn test_paths_overlap() {
        assert!(paths_overlap(Path::new("/repo"), Path::new("/repo/sub")));
        assert!(paths_overlap(Path::new("/repo/sub"), Path::new("/repo")));
        assert!(paths_overlap(Path::new("/repo"), Path::new("/repo")));
        assert!(!paths_overlap(Path::new("/repo"), Path::new("/repo2")));
        assert!(!paths_overlap(Path::new("/a/repo"), Path::new("/b/repo")));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RepoStatus::Debouncing).unwrap();
        assert_eq!(json, r#""debouncing""#);
        let parsed: RepoStatus = serde_json::from_str(r#""paused""#).unwrap();
        assert_eq!(parsed, RepoStatus::Paused);
    }

    #[test]
    fn test_repository_deserializes_with_missing_optional_fields() {
        let json = r#"{"path":"/tmp/r","threshold":5.0,"added_at":"2026-01-01T00:00:00Z"}"#;
        let repo: WatchedRepository = serde_json::from_str(json).unwrap();
        assert_eq!(repo.cumulative_delta, 0.0);
        assert_eq!(repo.status, RepoStatus::Watching);
    }
}
