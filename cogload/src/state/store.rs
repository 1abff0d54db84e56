//! On-disk state directory
//!
//! Layout (all human-readable):
//!
//! - `repos.json` - pretty-printed array of watched repositories, rewritten atomically
//! - `history.jsonl` - one commit attempt per line, append-only
//! - `audit.jsonl` - one control action per line, append-only
//! - `state.lock` - exclusive lock held while the store is open

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::domain::{AuditEntry, CommitHistoryEntry, WatchedRepository};

use super::messages::{StateError, StateResponse};

const REPOS_FILE: &str = "repos.json";
const HISTORY_FILE: &str = "history.jsonl";
const AUDIT_FILE: &str = "audit.jsonl";
const LOCK_FILE: &str = "state.lock";

/// File-backed store for repository records, commit history and audit log
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    repos: BTreeMap<PathBuf, WatchedRepository>,
    _lock: fs::File,
}

impl StateStore {
    /// Create the state directory and an empty `repos.json` if absent
    ///
    /// Returns true when `repos.json` was created. Existing records are never touched.
    pub fn initialize(dir: &Path) -> StateResponse<bool> {
        debug!(dir = %dir.display(), "StateStore::initialize: called");
        fs::create_dir_all(dir).map_err(|e| StateError::io(dir, e))?;
        let repos_path = dir.join(REPOS_FILE);
        if repos_path.exists() {
            debug!("StateStore::initialize: repos.json already present");
            return Ok(false);
        }
        write_atomic(&repos_path, &Vec::<WatchedRepository>::new())?;
        info!(path = %repos_path.display(), "Initialized state store");
        Ok(true)
    }

    /// Open the store, taking the exclusive directory lock
    pub fn open(dir: impl Into<PathBuf>) -> StateResponse<Self> {
        let dir = dir.into();
        debug!(dir = %dir.display(), "StateStore::open: called");
        fs::create_dir_all(&dir).map_err(|e| StateError::io(&dir, e))?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StateError::io(&lock_path, e))?;
        if lock.try_lock_exclusive().is_err() {
            debug!("StateStore::open: lock held elsewhere");
            return Err(StateError::Locked(dir));
        }

        let repos_path = dir.join(REPOS_FILE);
        let mut repos = BTreeMap::new();
        if repos_path.exists() {
            let content = fs::read_to_string(&repos_path).map_err(|e| StateError::io(&repos_path, e))?;
            if !content.trim().is_empty() {
                let records: Vec<WatchedRepository> =
                    serde_json::from_str(&content).map_err(|e| StateError::serialization(&repos_path, e))?;
                for repo in records {
                    repos.insert(repo.path.clone(), repo);
                }
            }
        }
        debug!(count = repos.len(), "StateStore::open: loaded repositories");

        Ok(Self {
            dir,
            repos,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All repository records, ordered by path
    pub fn repos(&self) -> Vec<WatchedRepository> {
        self.repos.values().cloned().collect()
    }

    /// Insert or replace a repository record and rewrite `repos.json`
    pub fn upsert_repo(&mut self, repo: WatchedRepository) -> StateResponse<()> {
        debug!(path = %repo.path.display(), status = %repo.status, "StateStore::upsert_repo: called");
        self.repos.insert(repo.path.clone(), repo);
        self.flush_repos()
    }

    /// Remove a repository record; returns false if it was not present
    pub fn remove_repo(&mut self, path: &Path) -> StateResponse<bool> {
        debug!(path = %path.display(), "StateStore::remove_repo: called");
        if self.repos.remove(path).is_none() {
            return Ok(false);
        }
        self.flush_repos()?;
        Ok(true)
    }

    pub fn append_history(&self, entry: &CommitHistoryEntry) -> StateResponse<()> {
        debug!(repo = %entry.repo_path.display(), result = entry.result.label(), "StateStore::append_history: called");
        append_line(&self.dir.join(HISTORY_FILE), entry)
    }

    /// History entries, most recent first, optionally filtered by repository
    pub fn read_history(&self, repo_filter: Option<&Path>, limit: usize) -> StateResponse<Vec<CommitHistoryEntry>> {
        let entries: Vec<CommitHistoryEntry> = read_lines(&self.dir.join(HISTORY_FILE))?;
        Ok(entries
            .into_iter()
            .rev()
            .filter(|e| repo_filter.is_none_or(|p| e.repo_path == p))
            .take(limit)
            .collect())
    }

    pub fn append_audit(&self, entry: &AuditEntry) -> StateResponse<()> {
        debug!(repo = %entry.repo_path.display(), action = %entry.action, "StateStore::append_audit: called");
        append_line(&self.dir.join(AUDIT_FILE), entry)
    }

    /// Audit entries, most recent first, optionally filtered by repository
    pub fn read_audit(&self, repo_filter: Option<&Path>, limit: usize) -> StateResponse<Vec<AuditEntry>> {
        let entries: Vec<AuditEntry> = read_lines(&self.dir.join(AUDIT_FILE))?;
        Ok(entries
            .into_iter()
            .rev()
            .filter(|e| repo_filter.is_none_or(|p| e.repo_path == p))
            .take(limit)
            .collect())
    }

    fn flush_repos(&self) -> StateResponse<()> {
        let records: Vec<&WatchedRepository> = self.repos.values().collect();
        write_atomic(&self.dir.join(REPOS_FILE), &records)
    }
}

/// Atomic write: serialize to a temp file in the same dir, then rename
fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StateResponse<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| StateError::io(parent, e))?;
    serde_json::to_writer_pretty(&mut tmp, value).map_err(|e| StateError::serialization(path, e))?;
    tmp.write_all(b"\n").map_err(|e| StateError::io(path, e))?;
    tmp.flush().map_err(|e| StateError::io(path, e))?;
    tmp.persist(path).map_err(|e| StateError::io(path, e.error))?;
    Ok(())
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> StateResponse<()> {
    let line = serde_json::to_string(value).map_err(|e| StateError::serialization(path, e))? + "\n";
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StateError::io(path, e))?;
    file.write_all(line.as_bytes()).map_err(|e| StateError::io(path, e))?;
    file.flush().map_err(|e| StateError::io(path, e))?;
    Ok(())
}

/// Read a JSONL file; malformed lines are skipped with a warning
fn read_lines<T: DeserializeOwned>(path: &Path) -> StateResponse<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path).map_err(|e| StateError::io(path, e))?;
    let mut entries = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StateError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(path = %path.display(), line = lineno + 1, error = %e, "Skipping malformed record"),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditAction, CommitResult, RepoStatus, TriggerReason};
    use tempfile::TempDir;

    #[test]
    fn test_initialize_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state");

        assert!(StateStore::initialize(&dir).unwrap());

        {
            let mut store = StateStore::open(&dir).unwrap();
            store.upsert_repo(WatchedRepository::new("/tmp/repoA", 10.0)).unwrap();
        }

        assert!(!StateStore::initialize(&dir).unwrap());
        let store = StateStore::open(&dir).unwrap();
        assert_eq!(store.repos().len(), 1);
    }

    #[test]
    fn test_upsert_persists_across_reopen() {
        let temp = TempDir::new().unwrap();

        {
            let mut store = StateStore::open(temp.path()).unwrap();
            let mut repo = WatchedRepository::new("/tmp/repoA", 10.0);
            repo.cumulative_delta = 7.5;
            repo.status = RepoStatus::Paused;
            store.upsert_repo(repo).unwrap();
        }

        let store = StateStore::open(temp.path()).unwrap();
        let repos = store.repos();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].cumulative_delta, 7.5);
        assert_eq!(repos[0].status, RepoStatus::Paused);
    }

    #[test]
    fn test_repos_file_is_readable_json() {
        let temp = TempDir::new().unwrap();
        let mut store = StateStore::open(temp.path()).unwrap();
        store.upsert_repo(WatchedRepository::new("/tmp/b", 10.0)).unwrap();
        store.upsert_repo(WatchedRepository::new("/tmp/a", 10.0)).unwrap();

        let content = fs::read_to_string(temp.path().join(REPOS_FILE)).unwrap();
        assert!(content.contains("\"cumulative_delta\""));
        let a = content.find("/tmp/a").unwrap();
        let b = content.find("/tmp/b").unwrap();
        assert!(a < b, "records are ordered by path");
    }

    #[test]
    fn test_remove_repo() {
        let temp = TempDir::new().unwrap();
        let mut store = StateStore::open(temp.path()).unwrap();
        store.upsert_repo(WatchedRepository::new("/tmp/repoA", 10.0)).unwrap();

        assert!(store.remove_repo(Path::new("/tmp/repoA")).unwrap());
        assert!(!store.remove_repo(Path::new("/tmp/repoA")).unwrap());
        assert!(store.repos().is_empty());
    }

    #[test]
    fn test_second_open_is_locked() {
        let temp = TempDir::new().unwrap();
        let _store = StateStore::open(temp.path()).unwrap();

        let result = StateStore::open(temp.path());
        assert!(matches!(result, Err(StateError::Locked(_))));
    }

    #[test]
    fn test_history_most_recent_first_with_filter_and_limit() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path()).unwrap();

        for delta in [1.0, 2.0, 3.0] {
            let entry = CommitHistoryEntry::new(
                "/tmp/repoA",
                delta,
                10.0,
                TriggerReason::ThresholdExceeded,
                CommitResult::success(),
            );
            store.append_history(&entry).unwrap();
        }
        let other = CommitHistoryEntry::new("/tmp/repoB", 9.0, 10.0, TriggerReason::ManualForce, CommitResult::NoChanges);
        store.append_history(&other).unwrap();

        let all = store.read_history(None, 10).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].repo_path, PathBuf::from("/tmp/repoB"));

        let only_a = store.read_history(Some(Path::new("/tmp/repoA")), 2).unwrap();
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].delta_at_commit, 3.0);
        assert_eq!(only_a[1].delta_at_commit, 2.0);
    }

    #[test]
    fn test_history_skips_malformed_lines() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path()).unwrap();
        let entry = CommitHistoryEntry::new("/tmp/repoA", 1.0, 10.0, TriggerReason::ManualForce, CommitResult::NoChanges);
        store.append_history(&entry).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(temp.path().join(HISTORY_FILE))
            .unwrap()
            .write_all(b"{not json\n")
            .unwrap();

        let entries = store.read_history(None, 10).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_audit_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path()).unwrap();
        store
            .append_audit(&AuditEntry::new("/tmp/repoA", AuditAction::Reset).with_previous_delta(7.0))
            .unwrap();

        let audit = store.read_audit(Some(Path::new("/tmp/repoA")), 10).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Reset);
        assert_eq!(audit[0].previous_delta, Some(7.0));
    }
}
