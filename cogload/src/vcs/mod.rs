//! Commit trigger
//!
//! Narrow interface over the version control system so trackers only ever
//! see `success | no_changes | failed`.

mod git;

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{CommitResult, TriggerReason};

pub use git::GitCommitTrigger;

/// What the tracker asks the VCS to commit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommitRequest {
    pub reason: TriggerReason,
    pub delta: f64,
    pub threshold: f64,
}

impl CommitRequest {
    pub fn new(reason: TriggerReason, delta: f64, threshold: f64) -> Self {
        Self {
            reason,
            delta,
            threshold,
        }
    }

    /// Deterministic commit message with a `Trigger:` trailer
    pub fn message(&self) -> String {
        let subject = match self.reason {
            TriggerReason::ThresholdExceeded => format!(
                "Auto-commit: cumulative complexity delta {:.1} exceeded threshold {}",
                self.delta,
                format_threshold(self.threshold)
            ),
            TriggerReason::ManualForce => format!(
                "Manual commit: cumulative complexity delta {:.1} (threshold {})",
                self.delta,
                format_threshold(self.threshold)
            ),
        };
        format!("{}\n\nTrigger: {}", subject, self.reason)
    }
}

fn format_threshold(threshold: f64) -> String {
    if threshold.fract() == 0.0 && threshold.abs() < 1e15 {
        format!("{:.0}", threshold)
    } else {
        threshold.to_string()
    }
}

/// Performs commits on behalf of a tracker
///
/// Never fails: every error is reported as `CommitResult::Failed`.
#[async_trait]
pub trait CommitTrigger: Send + Sync {
    async fn commit(&self, repo: &Path, request: &CommitRequest) -> CommitResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_message() {
        let request = CommitRequest::new(TriggerReason::ThresholdExceeded, 12.0, 10.0);
        assert_eq!(
            request.message(),
            "Auto-commit: cumulative complexity delta 12.0 exceeded threshold 10\n\nTrigger: threshold_exceeded"
        );
    }

    #[test]
    fn test_manual_message() {
        let request = CommitRequest::new(TriggerReason::ManualForce, 0.0, 7.5);
        assert_eq!(
            request.message(),
            "Manual commit: cumulative complexity delta 0.0 (threshold 7.5)\n\nTrigger: manual_force"
        );
    }

    #[test]
    fn test_negative_delta_message() {
        let request = CommitRequest::new(TriggerReason::ManualForce, -3.5, 20.0);
        assert!(request.message().starts_with("Manual commit: cumulative complexity delta -3.5 (threshold 20)"));
    }
}
