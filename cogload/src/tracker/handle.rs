//! TrackerHandle - the coordinator's side of a tracker task

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::messages::{TrackerInput, TrackerSnapshot};
use crate::domain::{CommitResult, RepoStatus, WatchedRepository};
use crate::error::CoordError;
use crate::watcher::WatchEvent;

/// Channels to one running tracker
#[derive(Debug)]
pub struct TrackerHandle {
    control: mpsc::Sender<TrackerInput>,
    events: mpsc::UnboundedSender<WatchEvent>,
    snapshot: watch::Receiver<TrackerSnapshot>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    pub(crate) fn new(
        control: mpsc::Sender<TrackerInput>,
        events: mpsc::UnboundedSender<WatchEvent>,
        snapshot: watch::Receiver<TrackerSnapshot>,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            control,
            events,
            snapshot,
            shutdown,
            task,
        }
    }

    /// Sender an event source delivers into
    pub fn events(&self) -> mpsc::UnboundedSender<WatchEvent> {
        self.events.clone()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshot.clone()
    }

    async fn send(&self, input: TrackerInput) -> Result<(), CoordError> {
        self.control.send(input).await.map_err(|_| CoordError::ChannelClosed)
    }

    /// Queue a forced commit; the receiver resolves once it has finished
    pub async fn request_commit(&self) -> Result<oneshot::Receiver<CommitResult>, CoordError> {
        debug!("request_commit: called");
        let (reply, rx) = oneshot::channel();
        self.send(TrackerInput::ForceCommit { reply }).await?;
        Ok(rx)
    }

    /// Queue a reset; the receiver resolves with the previous delta
    pub async fn request_reset(&self) -> Result<oneshot::Receiver<f64>, CoordError> {
        debug!("request_reset: called");
        let (reply, rx) = oneshot::channel();
        self.send(TrackerInput::Reset { reply }).await?;
        Ok(rx)
    }

    pub async fn reset(&self) -> Result<f64, CoordError> {
        self.request_reset().await?.await.map_err(|_| CoordError::ChannelClosed)
    }

    /// Queue a pause; resolves to `Err(status)` when the status does not allow it
    pub async fn request_pause(&self) -> Result<oneshot::Receiver<Result<(), RepoStatus>>, CoordError> {
        debug!("request_pause: called");
        let (reply, rx) = oneshot::channel();
        self.send(TrackerInput::Pause { reply }).await?;
        Ok(rx)
    }

    pub async fn pause(&self) -> Result<Result<(), RepoStatus>, CoordError> {
        self.request_pause().await?.await.map_err(|_| CoordError::ChannelClosed)
    }

    pub async fn request_resume(&self) -> Result<oneshot::Receiver<Result<(), RepoStatus>>, CoordError> {
        debug!("request_resume: called");
        let (reply, rx) = oneshot::channel();
        self.send(TrackerInput::Resume { reply }).await?;
        Ok(rx)
    }

    pub async fn resume(&self) -> Result<Result<(), RepoStatus>, CoordError> {
        self.request_resume().await?.await.map_err(|_| CoordError::ChannelClosed)
    }

    pub async fn watch_restored(&self) -> Result<(), CoordError> {
        self.send(TrackerInput::WatchRestored).await
    }

    /// Drain and stop; returns the final record
    ///
    /// A commit already running is given the shutdown timeout to finish.
    pub async fn shutdown(self) -> Result<WatchedRepository, CoordError> {
        debug!("shutdown: called");
        self.shutdown.send_replace(true);
        let (reply, rx) = oneshot::channel();
        self.send(TrackerInput::Shutdown { reply }).await?;
        let repo = rx.await.map_err(|_| CoordError::ChannelClosed)?;
        let _ = self.task.await;
        Ok(repo)
    }

    /// Stop without persisting
    pub async fn stop(self) -> Result<(), CoordError> {
        debug!("stop: called");
        let (reply, rx) = oneshot::channel();
        self.send(TrackerInput::Stop { reply }).await?;
        rx.await.map_err(|_| CoordError::ChannelClosed)?;
        let _ = self.task.await;
        Ok(())
    }
}
