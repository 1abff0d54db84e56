//! Daemon coordinator
//!
//! Owns the `DaemonState`: one tracker task and one watcher subscription per
//! repository. The same type backs both the long-running daemon (wrapped in
//! an actor, see `spawn`) and one-shot CLI commands run without a daemon.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eyre::Context;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::handle::CoordinatorHandle;
use super::messages::{CommitOutcome, CoordRequest, InitOutcome, RepoReport};
use crate::config::Config;
use crate::domain::{
    AuditAction, AuditEntry, CommitHistoryEntry, CommitResult, RepoStatus, WatchedRepository, paths_overlap,
};
use crate::error::CoordError;
use crate::estimator::{DeltaEstimator, build_estimator};
use crate::state::{StateManager, StateStore};
use crate::tracker::{self, TrackerContext, TrackerHandle, TrackerSnapshot};
use crate::vcs::{CommitTrigger, GitCommitTrigger};
use crate::watcher::{EventSource, IgnoreMatcher, NotifyEventSource, Subscription, WatchEvent};

/// External collaborators, swappable in tests
#[derive(Clone)]
pub struct Collaborators {
    pub estimator: Arc<dyn DeltaEstimator>,
    pub committer: Arc<dyn CommitTrigger>,
    pub source: Arc<dyn EventSource>,
}

impl Collaborators {
    /// Git, `notify` and the configured estimator
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let state_dir = absolute(&config.storage.state_dir);
        let estimator = build_estimator(&config.estimator)?;
        let committer = GitCommitTrigger::new().with_exclude(state_dir.clone());
        let matcher = IgnoreMatcher::new(&config.watcher.ignore).with_excluded_dir(state_dir);

        Ok(Self {
            estimator,
            committer: Arc::new(committer),
            source: Arc::new(NotifyEventSource::new(matcher)),
        })
    }
}

struct RepoSlot {
    tracker: TrackerHandle,
    subscription: Option<Subscription>,
}

/// Every watched repository, keyed and iterated by path
#[derive(Default)]
struct DaemonState {
    repos: BTreeMap<PathBuf, RepoSlot>,
    /// Removals still waiting for their tracker to stop
    removing: BTreeMap<PathBuf, JoinHandle<()>>,
    /// Event sources are attached (daemon or watch mode)
    running: bool,
}

pub struct Coordinator {
    config: Config,
    collab: Collaborators,
    store: StateManager,
    daemon: DaemonState,
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl Coordinator {
    /// Create the config file and state directory if absent
    ///
    /// Never touches existing repository records.
    pub fn init(config_path: &Path, config: &Config) -> eyre::Result<InitOutcome> {
        debug!(config = %config_path.display(), "init: called");
        let config_created = if config_path.exists() {
            false
        } else {
            config.save(config_path)?;
            true
        };

        let state_created = StateStore::initialize(&config.storage.state_dir)
            .context(format!("Failed to initialize {}", config.storage.state_dir.display()))?;

        if !config_created && !state_created {
            warn!("cogload is already initialized");
            return Ok(InitOutcome::AlreadyInitialized);
        }
        info!(config_created, state_created, "Initialized cogload");
        Ok(InitOutcome::Initialized {
            config_created,
            state_created,
        })
    }

    /// Load every persisted repository and start its tracker
    pub async fn open(config: Config, collab: Collaborators) -> Result<Self, CoordError> {
        Self::open_filtered(config, collab, None).await
    }

    /// Load a single registered repository (foreground `watch`)
    pub async fn open_single(config: Config, collab: Collaborators, path: &Path) -> Result<Self, CoordError> {
        Self::open_filtered(config, collab, Some(path)).await
    }

    async fn open_filtered(config: Config, collab: Collaborators, only: Option<&Path>) -> Result<Self, CoordError> {
        debug!(state_dir = %config.storage.state_dir.display(), ?only, "open: called");
        let store = StateManager::spawn(&config.storage.state_dir)?;
        let mut repos = store.load_repos().await?;

        if let Some(path) = only {
            let candidates = lookup_candidates(path);
            repos.retain(|repo| candidates.contains(&repo.path));
            if repos.is_empty() {
                store.shutdown().await?;
                return Err(CoordError::NotWatched(absolute(path)));
            }
        }

        let mut coordinator = Self {
            config,
            collab,
            store,
            daemon: DaemonState::default(),
        };

        for mut repo in repos {
            let restored = repo.status.restored();
            if restored != repo.status {
                debug!(path = %repo.path.display(), from = %repo.status, to = %restored, "open: restoring status");
                repo.status = restored;
                coordinator.store.upsert_repo(repo.clone()).await?;
            }
            coordinator.start_tracker(repo);
        }

        info!(count = coordinator.daemon.repos.len(), "Coordinator opened");
        Ok(coordinator)
    }

    fn tracker_context(&self) -> TrackerContext {
        TrackerContext {
            estimator: Arc::clone(&self.collab.estimator),
            committer: Arc::clone(&self.collab.committer),
            state: self.store.clone(),
            settings: self.config.daemon.clone(),
        }
    }

    fn start_tracker(&mut self, repo: WatchedRepository) {
        let path = repo.path.clone();
        let tracker = tracker::spawn(repo, self.tracker_context());
        let mut slot = RepoSlot {
            tracker,
            subscription: None,
        };
        if self.daemon.running {
            attach(self.collab.source.as_ref(), &path, &mut slot);
        }
        self.daemon.repos.insert(path, slot);
    }

    /// Attach an event source to every repository
    pub fn start_watching(&mut self) {
        info!(count = self.daemon.repos.len(), "Starting watchers");
        self.daemon.running = true;
        for (path, slot) in self.daemon.repos.iter_mut() {
            if slot.subscription.is_none() {
                attach(self.collab.source.as_ref(), path, slot);
            }
        }
    }

    /// Retry subscriptions whose watcher failed
    pub async fn resubscribe_failed(&mut self) {
        if !self.daemon.running {
            return;
        }
        for (path, slot) in self.daemon.repos.iter_mut() {
            if !slot.tracker.snapshot().watch_failed {
                continue;
            }
            slot.subscription = None;
            match self.collab.source.subscribe(path, slot.tracker.events()) {
                Ok(subscription) => {
                    info!(path = %path.display(), "Resubscribed watcher");
                    slot.subscription = Some(subscription);
                    if let Err(e) = slot.tracker.watch_restored().await {
                        warn!(path = %path.display(), error = %e, "Tracker gone while restoring watcher");
                    }
                }
                Err(e) => debug!(path = %path.display(), error = %e, "resubscribe_failed: still failing"),
            }
        }
    }

    /// Resolve a user-supplied path to a watched key
    fn resolve(&self, path: &Path) -> Result<PathBuf, CoordError> {
        lookup_candidates(path)
            .into_iter()
            .find(|candidate| self.daemon.repos.contains_key(candidate))
            .ok_or_else(|| CoordError::NotWatched(absolute(path)))
    }

    fn slot(&self, path: &Path) -> Result<(PathBuf, &RepoSlot), CoordError> {
        let key = self.resolve(path)?;
        let slot = self.daemon.repos.get(&key).ok_or_else(|| CoordError::NotWatched(key.clone()))?;
        Ok((key, slot))
    }

    /// Register a repository and, if running, start watching it
    pub async fn add(&mut self, path: &Path, threshold: Option<f64>) -> Result<WatchedRepository, CoordError> {
        debug!(path = %path.display(), ?threshold, "add: called");
        let invalid = |reason: &str| CoordError::InvalidRepository {
            path: absolute(path),
            reason: reason.to_string(),
        };

        let canonical = path.canonicalize().map_err(|_| invalid("path does not exist"))?;
        if !canonical.is_dir() {
            return Err(invalid("not a directory"));
        }
        if !canonical.join(".git").exists() {
            return Err(invalid("not a git repository (no .git)"));
        }

        let threshold = threshold.unwrap_or(self.config.daemon.default_threshold);
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(CoordError::InvalidThreshold(threshold));
        }

        if self.daemon.repos.contains_key(&canonical) {
            return Err(CoordError::DuplicateRepository(canonical));
        }
        if let Some(existing) = self.daemon.repos.keys().find(|existing| paths_overlap(existing, &canonical)) {
            return Err(CoordError::NestedRepository {
                path: canonical,
                existing: existing.clone(),
            });
        }

        // The old record must be gone before the new one is written
        if let Some(removal) = self.daemon.removing.remove(&canonical) {
            debug!(path = %canonical.display(), "add: waiting for pending removal");
            let _ = removal.await;
        }

        let repo = WatchedRepository::new(&canonical, threshold);
        self.store.upsert_repo(repo.clone()).await?;
        self.store
            .append_audit(AuditEntry::new(&canonical, AuditAction::Added))
            .await?;
        self.start_tracker(repo.clone());

        info!(path = %canonical.display(), threshold, "Repository added");
        Ok(repo)
    }

    /// Stop watching and forget a repository
    pub async fn remove(&mut self, path: &Path) -> Result<(), CoordError> {
        let pending = self.begin_remove(path)?;
        pending.await.unwrap_or_else(|_| Err(CoordError::ChannelClosed))
    }

    /// Detach a repository right away and finish removing it in the background
    ///
    /// The tracker may be mid-commit; its record is deleted only after it
    /// has stopped, so a late persist cannot bring it back.
    pub fn begin_remove(&mut self, path: &Path) -> Result<oneshot::Receiver<Result<(), CoordError>>, CoordError> {
        debug!(path = %path.display(), "begin_remove: called");
        let key = self.resolve(path)?;
        let slot = self.daemon.repos.remove(&key).ok_or_else(|| CoordError::NotWatched(key.clone()))?;
        drop(slot.subscription);

        let store = self.store.clone();
        let (reply, rx) = oneshot::channel();
        let task = tokio::spawn(finish_remove(key.clone(), slot.tracker, store, reply));
        self.daemon.removing.retain(|_, removal| !removal.is_finished());
        self.daemon.removing.insert(key, task);
        Ok(rx)
    }

    /// Repository summaries in path order
    pub fn list(&self) -> Vec<WatchedRepository> {
        self.daemon
            .repos
            .values()
            .map(|slot| slot.tracker.snapshot().repo)
            .collect()
    }

    /// Summaries plus live diagnostics
    pub fn status(&self) -> Vec<RepoReport> {
        let now = Instant::now();
        let remaining = |deadline: Option<Instant>| {
            deadline.map(|d| d.saturating_duration_since(now).as_millis() as u64)
        };

        self.daemon
            .repos
            .values()
            .map(|slot| {
                let snapshot = slot.tracker.snapshot();
                RepoReport {
                    debounce_remaining_ms: remaining(snapshot.debounce_deadline),
                    retry_in_ms: remaining(snapshot.retry_deadline),
                    watch_failed: snapshot.watch_failed,
                    counters: snapshot.counters,
                    repo: snapshot.repo,
                }
            })
            .collect()
    }

    /// Queue forced commits without waiting for them
    pub async fn request_commits(
        &self,
        path: Option<&Path>,
    ) -> Result<Vec<(PathBuf, oneshot::Receiver<CommitResult>)>, CoordError> {
        debug!(?path, "request_commits: called");
        let targets: Vec<PathBuf> = match path {
            Some(path) => vec![self.resolve(path)?],
            None => self.daemon.repos.keys().cloned().collect(),
        };

        let mut pending = Vec::with_capacity(targets.len());
        for key in targets {
            let (_, slot) = self.slot(&key)?;
            let rx = slot.tracker.request_commit().await?;
            pending.push((key, rx));
        }
        Ok(pending)
    }

    /// Force-commit one repository, or all of them
    pub async fn commit(&self, path: Option<&Path>) -> Result<Vec<CommitOutcome>, CoordError> {
        let pending = self.request_commits(path).await?;
        Ok(await_commits(pending).await)
    }

    /// Zero the delta without committing; returns the previous value
    pub async fn reset(&self, path: &Path) -> Result<f64, CoordError> {
        let pending = self.request_reset(path).await?;
        pending.await.map_err(|_| CoordError::ChannelClosed)
    }

    pub async fn request_reset(&self, path: &Path) -> Result<oneshot::Receiver<f64>, CoordError> {
        let (_, slot) = self.slot(path)?;
        slot.tracker.request_reset().await
    }

    pub async fn pause(&self, path: &Path) -> Result<(), CoordError> {
        let (key, pending) = self.request_pause(path).await?;
        await_transition(key, "pause", pending).await
    }

    pub async fn request_pause(&self, path: &Path) -> Result<(PathBuf, TransitionReply), CoordError> {
        let (key, slot) = self.slot(path)?;
        Ok((key, slot.tracker.request_pause().await?))
    }

    pub async fn resume(&self, path: &Path) -> Result<(), CoordError> {
        let (key, pending) = self.request_resume(path).await?;
        await_transition(key, "resume", pending).await
    }

    pub async fn request_resume(&self, path: &Path) -> Result<(PathBuf, TransitionReply), CoordError> {
        let (key, slot) = self.slot(path)?;
        Ok((key, slot.tracker.request_resume().await?))
    }

    /// Commit history, most recent first
    ///
    /// A path that is no longer watched still matches its old entries.
    pub async fn history(&self, path: Option<&Path>, limit: usize) -> Result<Vec<CommitHistoryEntry>, CoordError> {
        let filter = self.history_filter(path);
        let entries = self.store.read_history(filter, limit).await?;
        if let (Some(path), true) = (path, entries.is_empty()) {
            self.resolve(path)?;
        }
        Ok(entries)
    }

    /// Audit log, most recent first
    pub async fn audit(&self, path: Option<&Path>, limit: usize) -> Result<Vec<AuditEntry>, CoordError> {
        let filter = self.history_filter(path);
        let entries = self.store.read_audit(filter, limit).await?;
        if let (Some(path), true) = (path, entries.is_empty()) {
            self.resolve(path)?;
        }
        Ok(entries)
    }

    fn history_filter(&self, path: Option<&Path>) -> Option<PathBuf> {
        path.map(|p| self.resolve(p).unwrap_or_else(|_| absolute(p)))
    }

    /// Snapshot stream for one repository
    pub fn subscribe(&self, path: &Path) -> Result<watch::Receiver<TrackerSnapshot>, CoordError> {
        let (_, slot) = self.slot(path)?;
        Ok(slot.tracker.subscribe())
    }

    /// Stop watching, drain every tracker and release the store
    pub async fn shutdown(&mut self) -> Vec<WatchedRepository> {
        info!(count = self.daemon.repos.len(), "Coordinator shutting down");
        self.daemon.running = false;

        let slots = std::mem::take(&mut self.daemon.repos);
        let trackers: Vec<TrackerHandle> = slots
            .into_values()
            .map(|slot| {
                drop(slot.subscription);
                slot.tracker
            })
            .collect();

        let repos = join_all(trackers.into_iter().map(TrackerHandle::shutdown))
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(repo) => Some(repo),
                Err(e) => {
                    warn!(error = %e, "Tracker stopped before shutdown");
                    None
                }
            })
            .collect();

        for (path, removal) in std::mem::take(&mut self.daemon.removing) {
            if removal.await.is_err() {
                warn!(path = %path.display(), "Removal task failed");
            }
        }

        if let Err(e) = self.store.shutdown().await {
            warn!(error = %e, "State store already stopped");
        }
        info!("Coordinator stopped");
        repos
    }

    /// Run as an actor; returns the handle and the task yielding final records
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<Vec<WatchedRepository>>) {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(self.run(rx));
        (CoordinatorHandle::new(tx), task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<CoordRequest>) -> Vec<WatchedRepository> {
        let period = self.config.daemon.resubscribe_interval().max(Duration::from_secs(1));
        let mut resubscribe = tokio::time::interval_at(Instant::now() + period, period);
        resubscribe.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Coordinator started");
        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(CoordRequest::Shutdown { reply }) => {
                        let repos = self.shutdown().await;
                        let _ = reply.send(repos.clone());
                        return repos;
                    }
                    Some(request) => self.handle(request).await,
                    None => return self.shutdown().await,
                },
                _ = resubscribe.tick() => self.resubscribe_failed().await,
            }
        }
    }

    /// Requests that wait on a tracker are answered from a spawned task, so a
    /// repository that is mid-commit never holds up the others
    async fn handle(&mut self, request: CoordRequest) {
        match request {
            CoordRequest::Add { path, threshold, reply } => {
                let _ = reply.send(self.add(&path, threshold).await);
            }
            CoordRequest::Remove { path, reply } => match self.begin_remove(&path) {
                Ok(pending) => {
                    tokio::spawn(async move {
                        let _ = reply.send(pending.await.unwrap_or_else(|_| Err(CoordError::ChannelClosed)));
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            CoordRequest::List { reply } => {
                let _ = reply.send(self.list());
            }
            CoordRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            CoordRequest::Commit { path, reply } => match self.request_commits(path.as_deref()).await {
                Ok(pending) => {
                    tokio::spawn(async move {
                        let _ = reply.send(Ok(await_commits(pending).await));
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            CoordRequest::Reset { path, reply } => match self.request_reset(&path).await {
                Ok(pending) => {
                    tokio::spawn(async move {
                        let _ = reply.send(pending.await.map_err(|_| CoordError::ChannelClosed));
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            CoordRequest::Pause { path, reply } => match self.request_pause(&path).await {
                Ok((key, pending)) => {
                    tokio::spawn(async move {
                        let _ = reply.send(await_transition(key, "pause", pending).await);
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            CoordRequest::Resume { path, reply } => match self.request_resume(&path).await {
                Ok((key, pending)) => {
                    tokio::spawn(async move {
                        let _ = reply.send(await_transition(key, "resume", pending).await);
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            CoordRequest::History { path, limit, reply } => {
                let _ = reply.send(self.history(path.as_deref(), limit).await);
            }
            CoordRequest::Audit { path, limit, reply } => {
                let _ = reply.send(self.audit(path.as_deref(), limit).await);
            }
            CoordRequest::Subscribe { path, reply } => {
                let _ = reply.send(self.subscribe(&path));
            }
            // Intercepted by `run` before dispatch
            CoordRequest::Shutdown { .. } => {}
        }
    }
}

/// Paths a user-supplied path may be stored under
fn lookup_candidates(path: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(2);
    if let Ok(canonical) = path.canonicalize() {
        candidates.push(canonical);
    }
    let abs = absolute(path);
    if !candidates.contains(&abs) {
        candidates.push(abs);
    }
    candidates
}

fn attach(source: &dyn EventSource, path: &Path, slot: &mut RepoSlot) {
    match source.subscribe(path, slot.tracker.events()) {
        Ok(subscription) => {
            debug!(path = %path.display(), "attach: subscribed");
            slot.subscription = Some(subscription);
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to watch repository");
            let _ = slot.tracker.events().send(WatchEvent::Error { message: e.to_string() });
        }
    }
}

/// Tracker answer to pause or resume; `Err` carries the refusing status
pub type TransitionReply = oneshot::Receiver<Result<(), RepoStatus>>;

async fn await_transition(key: PathBuf, action: &'static str, pending: TransitionReply) -> Result<(), CoordError> {
    pending
        .await
        .map_err(|_| CoordError::ChannelClosed)?
        .map_err(|status| CoordError::InvalidState {
            path: key,
            action,
            status,
        })
}

/// Stop the tracker, then drop its record and audit the removal
async fn finish_remove(
    key: PathBuf,
    tracker: TrackerHandle,
    store: StateManager,
    reply: oneshot::Sender<Result<(), CoordError>>,
) {
    let snapshot = tracker.subscribe();
    if let Err(e) = tracker.stop().await {
        warn!(path = %key.display(), error = %e, "Tracker already gone");
    }
    let previous = snapshot.borrow().repo.cumulative_delta;

    let result = async {
        store.remove_repo(&key).await?;
        store
            .append_audit(AuditEntry::new(&key, AuditAction::Removed).with_previous_delta(previous))
            .await?;
        info!(path = %key.display(), "Repository removed");
        Ok::<(), CoordError>(())
    }
    .await;
    let _ = reply.send(result);
}

async fn await_commits(pending: Vec<(PathBuf, oneshot::Receiver<CommitResult>)>) -> Vec<CommitOutcome> {
    join_all(pending.into_iter().map(|(path, rx)| async move {
        let result = rx
            .await
            .unwrap_or_else(|_| CommitResult::failed("tracker stopped before committing"));
        CommitOutcome { path, result }
    }))
    .await
}
