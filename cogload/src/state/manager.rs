//! StateManager - actor that owns the StateStore
//!
//! Processes commands via channels so that every write to the state
//! directory is serialized, no matter how many trackers commit at once.

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{AuditEntry, CommitHistoryEntry, WatchedRepository};

use super::messages::{StateCommand, StateError, StateResponse};
use super::store::StateStore;

/// Handle to send commands to the StateManager
#[derive(Clone, Debug)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    dir: PathBuf,
}

impl StateManager {
    /// Open the store at `dir` and spawn the actor
    ///
    /// Fails immediately if another process holds the state directory lock.
    pub fn spawn(dir: impl AsRef<Path>) -> StateResponse<Self> {
        debug!(dir = %dir.as_ref().display(), "spawn: called");
        let store = StateStore::open(dir.as_ref())?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(actor_loop(store, rx));

        info!(dir = %dir.as_ref().display(), "StateManager spawned");
        Ok(Self {
            tx,
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Load every persisted repository record, ordered by path
    pub async fn load_repos(&self) -> StateResponse<Vec<WatchedRepository>> {
        debug!("load_repos: called");
        self.request(|reply| StateCommand::LoadRepos { reply }).await
    }

    /// Insert or replace a repository record
    pub async fn upsert_repo(&self, repo: WatchedRepository) -> StateResponse<()> {
        debug!(path = %repo.path.display(), "upsert_repo: called");
        self.request(|reply| StateCommand::UpsertRepo { repo, reply }).await
    }

    /// Remove a repository record; false if it was not present
    pub async fn remove_repo(&self, path: &Path) -> StateResponse<bool> {
        debug!(path = %path.display(), "remove_repo: called");
        let path = path.to_path_buf();
        self.request(|reply| StateCommand::RemoveRepo { path, reply }).await
    }

    pub async fn append_history(&self, entry: CommitHistoryEntry) -> StateResponse<()> {
        debug!(repo = %entry.repo_path.display(), "append_history: called");
        self.request(|reply| StateCommand::AppendHistory { entry, reply }).await
    }

    /// Commit history, most recent first
    pub async fn read_history(&self, repo_filter: Option<PathBuf>, limit: usize) -> StateResponse<Vec<CommitHistoryEntry>> {
        debug!(?repo_filter, limit, "read_history: called");
        self.request(|reply| StateCommand::ReadHistory {
            repo_filter,
            limit,
            reply,
        })
        .await
    }

    pub async fn append_audit(&self, entry: AuditEntry) -> StateResponse<()> {
        debug!(repo = %entry.repo_path.display(), action = %entry.action, "append_audit: called");
        self.request(|reply| StateCommand::AppendAudit { entry, reply }).await
    }

    /// Audit log, most recent first
    pub async fn read_audit(&self, repo_filter: Option<PathBuf>, limit: usize) -> StateResponse<Vec<AuditEntry>> {
        debug!(?repo_filter, limit, "read_audit: called");
        self.request(|reply| StateCommand::ReadAudit {
            repo_filter,
            limit,
            reply,
        })
        .await
    }

    /// Stop the actor and release the directory lock
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StateCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)
    }
}

/// The actor loop that processes commands
async fn actor_loop(mut store: StateStore, mut rx: mpsc::Receiver<StateCommand>) {
    debug!(dir = %store.dir().display(), "actor_loop: started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::LoadRepos { reply } => {
                debug!("actor_loop: LoadRepos command");
                let _ = reply.send(Ok(store.repos()));
            }

            StateCommand::UpsertRepo { repo, reply } => {
                debug!(path = %repo.path.display(), "actor_loop: UpsertRepo command");
                let _ = reply.send(store.upsert_repo(repo));
            }

            StateCommand::RemoveRepo { path, reply } => {
                debug!(path = %path.display(), "actor_loop: RemoveRepo command");
                let _ = reply.send(store.remove_repo(&path));
            }

            StateCommand::AppendHistory { entry, reply } => {
                debug!(repo = %entry.repo_path.display(), "actor_loop: AppendHistory command");
                let _ = reply.send(store.append_history(&entry));
            }

            StateCommand::ReadHistory {
                repo_filter,
                limit,
                reply,
            } => {
                debug!(?repo_filter, limit, "actor_loop: ReadHistory command");
                let _ = reply.send(store.read_history(repo_filter.as_deref(), limit));
            }

            StateCommand::AppendAudit { entry, reply } => {
                debug!(repo = %entry.repo_path.display(), "actor_loop: AppendAudit command");
                let _ = reply.send(store.append_audit(&entry));
            }

            StateCommand::ReadAudit {
                repo_filter,
                limit,
                reply,
            } => {
                debug!(?repo_filter, limit, "actor_loop: ReadAudit command");
                let _ = reply.send(store.read_audit(repo_filter.as_deref(), limit));
            }

            StateCommand::Shutdown { reply } => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                drop(store);
                let _ = reply.send(());
                return;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditAction, CommitResult, TriggerReason};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_manager_repo_crud() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let mut repo = WatchedRepository::new("/tmp/repoA", 10.0);
        manager.upsert_repo(repo.clone()).await.unwrap();

        repo.cumulative_delta = 4.0;
        manager.upsert_repo(repo).await.unwrap();

        let repos = manager.load_repos().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].cumulative_delta, 4.0);

        assert!(manager.remove_repo(Path::new("/tmp/repoA")).await.unwrap());
        assert!(manager.load_repos().await.unwrap().is_empty());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_manager_history_and_audit() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let entry = CommitHistoryEntry::new(
            "/tmp/repoA",
            12.0,
            10.0,
            TriggerReason::ThresholdExceeded,
            CommitResult::success(),
        );
        manager.append_history(entry.clone()).await.unwrap();
        manager
            .append_audit(AuditEntry::new("/tmp/repoA", AuditAction::Added))
            .await
            .unwrap();

        let history = manager.read_history(None, 10).await.unwrap();
        assert_eq!(history, vec![entry]);

        let audit = manager.read_audit(Some(PathBuf::from("/tmp/repoA")), 10).await.unwrap();
        assert_eq!(audit.len(), 1);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_lock() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();
        assert!(matches!(StateManager::spawn(temp.path()), Err(StateError::Locked(_))));

        manager.shutdown().await.unwrap();

        let reopened = StateManager::spawn(temp.path()).unwrap();
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail_with_channel_error() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();
        manager.shutdown().await.unwrap();

        let result = manager.load_repos().await;
        assert!(matches!(result, Err(StateError::ChannelError)));
    }
}
