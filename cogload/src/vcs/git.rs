//! Git-backed commit trigger
//!
//! Shells out to `git` the same way for every step and captures stderr so
//! a failure can be recorded verbatim in history.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CommitRequest, CommitTrigger};
use crate::domain::CommitResult;

/// Commits with the `git` binary found on `PATH`
#[derive(Debug, Clone, Default)]
pub struct GitCommitTrigger {
    /// Absolute paths never staged (the daemon's own state directory)
    exclude: Vec<PathBuf>,
}

impl GitCommitTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never stage anything under `path` when it lives inside a repository
    pub fn with_exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude.push(path.into());
        self
    }

    /// `:(exclude)` pathspecs for the excluded paths inside `repo`
    fn pathspec(&self, repo: &Path) -> Vec<String> {
        let mut spec = vec!["--".to_string(), ".".to_string()];
        for path in &self.exclude {
            match path.strip_prefix(repo) {
                Ok(relative) if !relative.as_os_str().is_empty() => {
                    spec.push(format!(":(exclude){}", relative.display()));
                }
                _ => {}
            }
        }
        spec
    }

    /// True if `git status --porcelain` reports anything outside the excludes
    pub async fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool> {
        let mut args = vec!["status".to_string(), "--porcelain".to_string()];
        args.extend(self.pathspec(repo));
        let stdout = git(repo, &args).await?;
        Ok(!stdout.trim().is_empty())
    }

    /// Reasons the repository cannot take an automatic commit right now
    async fn precheck(&self, repo: &Path) -> Result<Option<String>> {
        if git_path(repo, "index.lock").await?.exists() {
            return Ok(Some("index.lock present; another git process is running".to_string()));
        }
        if git_path(repo, "MERGE_HEAD").await?.exists() {
            return Ok(Some("merge in progress".to_string()));
        }
        let head = Command::new("git")
            .args(["symbolic-ref", "-q", "HEAD"])
            .current_dir(repo)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run git symbolic-ref")?;
        if !head.status.success() {
            return Ok(Some("HEAD is detached".to_string()));
        }
        Ok(None)
    }

    async fn try_commit(&self, repo: &Path, request: &CommitRequest) -> Result<CommitResult> {
        if let Some(reason) = self.precheck(repo).await? {
            return Ok(CommitResult::failed(reason));
        }

        if !self.has_uncommitted_changes(repo).await? {
            debug!(repo = %repo.display(), "try_commit: working tree clean");
            return Ok(CommitResult::NoChanges);
        }

        let mut add = vec!["add".to_string(), "-A".to_string()];
        add.extend(self.pathspec(repo));
        git(repo, &add).await?;

        let message = request.message();
        git(repo, &["commit".to_string(), "-m".to_string(), message]).await?;

        let commit_id = git(repo, &["rev-parse".to_string(), "HEAD".to_string()])
            .await
            .map(|out| out.trim().to_string())
            .ok();

        Ok(CommitResult::Success { commit_id })
    }
}

#[async_trait]
impl CommitTrigger for GitCommitTrigger {
    async fn commit(&self, repo: &Path, request: &CommitRequest) -> CommitResult {
        debug!(repo = %repo.display(), reason = %request.reason, delta = request.delta, "commit: called");
        let result = match self.try_commit(repo, request).await {
            Ok(result) => result,
            Err(e) => CommitResult::failed(format!("{:#}", e)),
        };
        match &result {
            CommitResult::Failed { error } => warn!(repo = %repo.display(), %error, "Commit failed"),
            other => info!(repo = %repo.display(), result = other.label(), "Commit finished"),
        }
        result
    }
}

/// Run git in `repo`, returning stdout or failing with stderr
///
/// The child is killed if the future is dropped, so a commit abandoned on
/// timeout or shutdown cannot land after it was recorded as failed.
async fn git(repo: &Path, args: &[String]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .kill_on_drop(true)
        .output()
        .await
        .context("Failed to run git")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        bail!("git {} failed: {}", args.first().map(String::as_str).unwrap_or(""), detail.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Resolve a path inside the git directory (works for worktrees too)
async fn git_path(repo: &Path, name: &str) -> Result<PathBuf> {
    let out = git(repo, &["rev-parse".to_string(), "--git-path".to_string(), name.to_string()]).await?;
    let path = PathBuf::from(out.trim());
    Ok(if path.is_absolute() { path } else { repo.join(path) })
}
