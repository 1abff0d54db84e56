//! CoordinatorHandle - client interface to the running coordinator

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::messages::{CommitOutcome, CoordRequest, RepoReport};
use crate::domain::{AuditEntry, CommitHistoryEntry, WatchedRepository};
use crate::error::CoordError;
use crate::tracker::TrackerSnapshot;

/// Cloneable handle used by the IPC server and the CLI
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<CoordRequest>) -> Self {
        Self { tx }
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> CoordRequest) -> Result<T, CoordError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| CoordError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordError::ChannelClosed)
    }

    pub async fn add(&self, path: &Path, threshold: Option<f64>) -> Result<WatchedRepository, CoordError> {
        debug!(path = %path.display(), ?threshold, "CoordinatorHandle::add: called");
        let path = path.to_path_buf();
        self.call(|reply| CoordRequest::Add { path, threshold, reply }).await?
    }

    pub async fn remove(&self, path: &Path) -> Result<(), CoordError> {
        debug!(path = %path.display(), "CoordinatorHandle::remove: called");
        let path = path.to_path_buf();
        self.call(|reply| CoordRequest::Remove { path, reply }).await?
    }

    pub async fn list(&self) -> Result<Vec<WatchedRepository>, CoordError> {
        self.call(|reply| CoordRequest::List { reply }).await
    }

    pub async fn status(&self) -> Result<Vec<RepoReport>, CoordError> {
        self.call(|reply| CoordRequest::Status { reply }).await
    }

    /// Force-commit and wait for every targeted repository
    pub async fn commit(&self, path: Option<&Path>) -> Result<Vec<CommitOutcome>, CoordError> {
        debug!(?path, "CoordinatorHandle::commit: called");
        let path = path.map(Path::to_path_buf);
        self.call(|reply| CoordRequest::Commit { path, reply }).await?
    }

    pub async fn reset(&self, path: &Path) -> Result<f64, CoordError> {
        debug!(path = %path.display(), "CoordinatorHandle::reset: called");
        let path = path.to_path_buf();
        self.call(|reply| CoordRequest::Reset { path, reply }).await?
    }

    pub async fn pause(&self, path: &Path) -> Result<(), CoordError> {
        let path = path.to_path_buf();
        self.call(|reply| CoordRequest::Pause { path, reply }).await?
    }

    pub async fn resume(&self, path: &Path) -> Result<(), CoordError> {
        let path = path.to_path_buf();
        self.call(|reply| CoordRequest::Resume { path, reply }).await?
    }

    pub async fn history(&self, path: Option<&Path>, limit: usize) -> Result<Vec<CommitHistoryEntry>, CoordError> {
        let path: Option<PathBuf> = path.map(Path::to_path_buf);
        self.call(|reply| CoordRequest::History { path, limit, reply }).await?
    }

    pub async fn audit(&self, path: Option<&Path>, limit: usize) -> Result<Vec<AuditEntry>, CoordError> {
        let path: Option<PathBuf> = path.map(Path::to_path_buf);
        self.call(|reply| CoordRequest::Audit { path, limit, reply }).await?
    }

    pub async fn subscribe(&self, path: &Path) -> Result<watch::Receiver<TrackerSnapshot>, CoordError> {
        let path = path.to_path_buf();
        self.call(|reply| CoordRequest::Subscribe { path, reply }).await?
    }

    /// Drain and stop the coordinator; returns the final records
    pub async fn shutdown(&self) -> Result<Vec<WatchedRepository>, CoordError> {
        debug!("CoordinatorHandle::shutdown: called");
        self.call(|reply| CoordRequest::Shutdown { reply }).await
    }
}
