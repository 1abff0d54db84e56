//! Repository tracker task
//!
//! One task per watched repository. It owns the repository record and is
//! the only writer of its `cumulative_delta` and `status`; everything else
//! reads the published snapshot.
//!
//! Timing: every accepted event re-arms the debounce deadline at the full
//! delay, so a burst produces exactly one evaluation once it goes quiet.
//! Commits are awaited inside the task, which makes events that arrive
//! meanwhile queue up and count toward the next cycle. Once shutdown is
//! signalled, a running commit gets at most the shutdown timeout before it
//! is abandoned and recorded as failed.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use super::handle::TrackerHandle;
use super::messages::{TrackerCounters, TrackerInput, TrackerSnapshot};
use crate::config::DaemonConfig;
use crate::domain::{
    AuditAction, AuditEntry, CommitHistoryEntry, CommitResult, RepoStatus, TriggerReason, WatchedRepository,
};
use crate::estimator::DeltaEstimator;
use crate::state::StateManager;
use crate::vcs::{CommitRequest, CommitTrigger};
use crate::watcher::{FileEvent, WatchEvent};

/// Shared collaborators handed to every tracker
#[derive(Clone)]
pub struct TrackerContext {
    pub estimator: Arc<dyn DeltaEstimator>,
    pub committer: Arc<dyn CommitTrigger>,
    pub state: StateManager,
    pub settings: DaemonConfig,
}

/// Spawn a tracker task for `repo`
pub fn spawn(repo: WatchedRepository, ctx: TrackerContext) -> TrackerHandle {
    debug!(repo = %repo.path.display(), "spawn: called");
    let (control_tx, control_rx) = mpsc::channel(32);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(TrackerSnapshot::new(repo.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tracker = Tracker {
        repo,
        ctx,
        control: control_rx,
        events: events_rx,
        snapshot: snapshot_tx,
        shutdown: shutdown_rx,
        debounce_deadline: None,
        retry_deadline: None,
        failures: 0,
        pending_while_blocked: false,
        watch_error: None,
        counters: TrackerCounters::default(),
    };

    let task = tokio::spawn(tracker.run());
    TrackerHandle::new(control_tx, events_tx, snapshot_rx, shutdown_tx, task)
}

struct Tracker {
    repo: WatchedRepository,
    ctx: TrackerContext,
    control: mpsc::Receiver<TrackerInput>,
    events: mpsc::UnboundedReceiver<WatchEvent>,
    snapshot: watch::Sender<TrackerSnapshot>,
    /// Flipped by the handle before the `Shutdown` message is queued
    shutdown: watch::Receiver<bool>,
    debounce_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,
    /// Consecutive failed commits; drives the backoff
    failures: u32,
    /// Events accepted while evaluation was blocked (error or paused mid-window)
    pending_while_blocked: bool,
    watch_error: Option<String>,
    counters: TrackerCounters,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Resolves once shutdown has been signalled; never if the handle is gone
async fn shutdown_signalled(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        pending::<()>().await;
    }
}

impl Tracker {
    async fn run(mut self) {
        info!(
            repo = %self.repo.path.display(),
            status = %self.repo.status,
            delta = self.repo.cumulative_delta,
            "Tracker started"
        );
        self.publish();
        let mut events_open = true;

        loop {
            let debounce = self.debounce_deadline;
            let retry = self.retry_deadline;

            tokio::select! {
                biased;

                input = self.control.recv() => match input {
                    Some(TrackerInput::ForceCommit { reply }) => {
                        let result = self.run_commit(TriggerReason::ManualForce).await;
                        let _ = reply.send(result);
                    }
                    Some(TrackerInput::Reset { reply }) => {
                        let previous = self.reset().await;
                        let _ = reply.send(previous);
                    }
                    Some(TrackerInput::Pause { reply }) => {
                        let result = self.pause().await;
                        let _ = reply.send(result);
                    }
                    Some(TrackerInput::Resume { reply }) => {
                        let result = self.resume().await;
                        let _ = reply.send(result);
                    }
                    Some(TrackerInput::WatchRestored) => self.watch_restored().await,
                    Some(TrackerInput::Shutdown { reply }) => {
                        self.drain().await;
                        self.persist().await;
                        self.publish();
                        let _ = reply.send(self.repo.clone());
                        break;
                    }
                    Some(TrackerInput::Stop { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        debug!(repo = %self.repo.path.display(), "run: control channel closed");
                        break;
                    }
                },

                event = self.events.recv(), if events_open => match event {
                    Some(WatchEvent::Change(change)) => self.on_change(change).await,
                    Some(WatchEvent::Error { message }) => self.on_watch_error(message).await,
                    None => events_open = false,
                },

                _ = sleep_until_opt(debounce), if debounce.is_some() => self.on_debounce_expired().await,

                _ = sleep_until_opt(retry), if retry.is_some() => self.on_retry().await,
            }

            self.publish();
        }

        debug!(repo = %self.repo.path.display(), "Tracker stopped");
    }

    fn publish(&self) {
        self.snapshot.send_replace(TrackerSnapshot {
            repo: self.repo.clone(),
            debounce_deadline: self.debounce_deadline,
            retry_deadline: self.retry_deadline,
            watch_failed: self.watch_error.is_some(),
            counters: self.counters,
        });
    }

    fn transition(&mut self, next: RepoStatus) {
        let current = self.repo.status;
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(repo = %self.repo.path.display(), from = %current, to = %next, "Unexpected status transition");
        }
        debug!(repo = %self.repo.path.display(), from = %current, to = %next, "transition");
        self.repo.status = next;
    }

    fn arm_debounce(&mut self) {
        self.transition(RepoStatus::Debouncing);
        self.debounce_deadline = Some(Instant::now() + self.ctx.settings.debounce());
    }

    async fn persist(&self) {
        if let Err(e) = self.ctx.state.upsert_repo(self.repo.clone()).await {
            error!(repo = %self.repo.path.display(), error = %e, "Failed to persist repository state");
        }
    }

    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.ctx.state.append_audit(entry).await {
            error!(repo = %self.repo.path.display(), error = %e, "Failed to append audit entry");
        }
    }

    async fn on_change(&mut self, change: FileEvent) {
        self.counters.events_seen += 1;

        if self.repo.status == RepoStatus::Paused {
            self.counters.events_ignored += 1;
            warn!(
                repo = %self.repo.path.display(),
                file = %change.file_path.display(),
                "Ignoring event while paused"
            );
            return;
        }

        let delta = match self
            .ctx
            .estimator
            .estimate_delta(&self.repo.path, &change.file_path)
            .await
        {
            Ok(delta) => delta,
            Err(e) => {
                warn!(
                    repo = %self.repo.path.display(),
                    file = %change.file_path.display(),
                    error = %e,
                    "Delta estimation failed, counting as 0"
                );
                0.0
            }
        };

        self.repo.cumulative_delta += delta;
        self.repo.last_event_time = Some(change.timestamp);
        debug!(
            repo = %self.repo.path.display(),
            file = %change.file_path.display(),
            kind = %change.kind,
            delta,
            cumulative = self.repo.cumulative_delta,
            "on_change: accumulated"
        );

        if self.repo.status == RepoStatus::Error {
            self.pending_while_blocked = true;
            return;
        }

        self.arm_debounce();
    }

    async fn on_watch_error(&mut self, message: String) {
        warn!(repo = %self.repo.path.display(), error = %message, "Watcher failed");
        self.watch_error = Some(message.clone());
        self.repo.last_error = Some(message);

        if self.repo.status != RepoStatus::Paused {
            if self.debounce_deadline.take().is_some() {
                self.pending_while_blocked = true;
            }
            self.transition(RepoStatus::Error);
        }
        self.persist().await;
    }

    async fn watch_restored(&mut self) {
        if self.watch_error.take().is_none() {
            return;
        }
        info!(repo = %self.repo.path.display(), "Watcher restored");

        if self.repo.status == RepoStatus::Error && self.retry_deadline.is_none() {
            self.leave_error();
        }
        self.persist().await;
    }

    /// Back to watching, opening a window right away if events piled up
    fn leave_error(&mut self) {
        self.transition(RepoStatus::Watching);
        if std::mem::take(&mut self.pending_while_blocked) {
            self.arm_debounce();
        }
    }

    async fn on_debounce_expired(&mut self) {
        self.debounce_deadline = None;
        self.counters.evaluations += 1;
        debug!(
            repo = %self.repo.path.display(),
            delta = self.repo.cumulative_delta,
            threshold = self.repo.threshold,
            "on_debounce_expired: evaluating"
        );

        if self.repo.threshold_reached() {
            info!(
                repo = %self.repo.path.display(),
                delta = self.repo.cumulative_delta,
                threshold = self.repo.threshold,
                "Threshold reached"
            );
            self.run_commit(TriggerReason::ThresholdExceeded).await;
        } else {
            self.transition(RepoStatus::Watching);
            self.persist().await;
        }
    }

    async fn on_retry(&mut self) {
        self.retry_deadline = None;
        if self.repo.status != RepoStatus::Error {
            return;
        }
        if self.watch_error.is_some() {
            debug!(repo = %self.repo.path.display(), "on_retry: watcher still failing");
            return;
        }
        info!(repo = %self.repo.path.display(), failures = self.failures, "Retry backoff elapsed");
        self.leave_error();
        self.persist().await;
    }

    async fn run_commit(&mut self, reason: TriggerReason) -> CommitResult {
        self.counters.commit_attempts += 1;
        let was_paused = self.repo.status == RepoStatus::Paused;
        self.debounce_deadline = None;
        self.retry_deadline = None;
        self.pending_while_blocked = false;
        self.transition(RepoStatus::Committing);
        self.publish();

        let request = CommitRequest::new(reason, self.repo.cumulative_delta, self.repo.threshold);
        let result = self.await_commit(&request).await;

        let entry = CommitHistoryEntry::new(
            &self.repo.path,
            request.delta,
            request.threshold,
            reason,
            result.clone(),
        );
        if let Err(e) = self.ctx.state.append_history(entry).await {
            error!(repo = %self.repo.path.display(), error = %e, "Failed to append commit history");
        }

        if result.resets_delta() {
            self.repo.cumulative_delta = 0.0;
            self.failures = 0;
            self.repo.last_error = None;
            if was_paused {
                self.transition(RepoStatus::Paused);
            } else if let Some(message) = self.watch_error.clone() {
                self.repo.last_error = Some(message);
                self.transition(RepoStatus::Error);
            } else {
                self.transition(RepoStatus::Watching);
            }
        } else {
            self.failures += 1;
            self.repo.last_error = result.error().map(str::to_string);
            if was_paused {
                self.transition(RepoStatus::Paused);
            } else {
                let backoff = self.ctx.settings.retry_backoff(self.failures);
                self.transition(RepoStatus::Error);
                self.retry_deadline = Some(Instant::now() + backoff);
                warn!(
                    repo = %self.repo.path.display(),
                    failures = self.failures,
                    retry_in_ms = backoff.as_millis() as u64,
                    "Commit failed, delta kept"
                );
            }
        }

        info!(
            repo = %self.repo.path.display(),
            reason = %reason,
            result = result.label(),
            delta = request.delta,
            "Commit attempt recorded"
        );
        self.persist().await;
        result
    }

    /// Run the committer under the commit timeout, cut short by shutdown
    async fn await_commit(&self, request: &CommitRequest) -> CommitResult {
        let timeout = self.ctx.settings.commit_timeout();
        let commit = tokio::time::timeout(timeout, self.ctx.committer.commit(&self.repo.path, request));
        tokio::pin!(commit);

        let outcome = tokio::select! {
            biased;

            outcome = &mut commit => outcome,
            _ = shutdown_signalled(self.shutdown.clone()) => {
                let grace = self.ctx.settings.shutdown_timeout();
                debug!(
                    repo = %self.repo.path.display(),
                    grace_ms = grace.as_millis() as u64,
                    "await_commit: shutdown during commit"
                );
                match tokio::time::timeout(grace, &mut commit).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(repo = %self.repo.path.display(), "Commit abandoned at shutdown");
                        return CommitResult::failed(format!(
                            "commit abandoned after shutdown timeout of {}ms",
                            grace.as_millis()
                        ));
                    }
                }
            }
        };

        outcome.unwrap_or_else(|_| CommitResult::failed(format!("commit timed out after {}ms", timeout.as_millis())))
    }

    async fn reset(&mut self) -> f64 {
        let previous = self.repo.cumulative_delta;
        self.repo.cumulative_delta = 0.0;
        self.debounce_deadline = None;
        self.pending_while_blocked = false;
        if self.repo.status == RepoStatus::Debouncing {
            self.transition(RepoStatus::Watching);
        }

        info!(repo = %self.repo.path.display(), previous_delta = previous, "Cumulative delta reset");
        self.audit(AuditEntry::new(&self.repo.path, AuditAction::Reset).with_previous_delta(previous))
            .await;
        self.persist().await;
        previous
    }

    async fn pause(&mut self) -> Result<(), RepoStatus> {
        let status = self.repo.status;
        if status == RepoStatus::Paused || !status.can_transition_to(RepoStatus::Paused) {
            return Err(status);
        }
        if self.debounce_deadline.take().is_some() {
            self.pending_while_blocked = true;
        }
        self.retry_deadline = None;
        self.transition(RepoStatus::Paused);

        info!(repo = %self.repo.path.display(), "Paused");
        self.audit(AuditEntry::new(&self.repo.path, AuditAction::Paused)).await;
        self.persist().await;
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), RepoStatus> {
        let status = self.repo.status;
        if status != RepoStatus::Paused {
            return Err(status);
        }

        self.transition(RepoStatus::Watching);
        if let Some(message) = self.watch_error.clone() {
            self.repo.last_error = Some(message);
            self.transition(RepoStatus::Error);
        } else if std::mem::take(&mut self.pending_while_blocked) {
            self.arm_debounce();
        }

        info!(repo = %self.repo.path.display(), status = %self.repo.status, "Resumed");
        self.audit(AuditEntry::new(&self.repo.path, AuditAction::Resumed)).await;
        self.persist().await;
        Ok(())
    }

    /// Final evaluation of an open window
    ///
    /// Shutdown is already signalled here, so a commit this starts is
    /// bounded by the shutdown timeout.
    async fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                WatchEvent::Change(change) => self.on_change(change).await,
                WatchEvent::Error { message } => self.on_watch_error(message).await,
            }
        }

        if self.debounce_deadline.is_some() {
            self.on_debounce_expired().await;
        }
    }
}
