//! Production event source backed by the `notify` crate

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ChangeKind, EventSource, FileEvent, IgnoreMatcher, Subscription, WatchError, WatchEvent};

/// Recursive OS watcher, one `notify` watcher per repository
#[derive(Debug, Clone)]
pub struct NotifyEventSource {
    matcher: Arc<IgnoreMatcher>,
}

impl NotifyEventSource {
    pub fn new(matcher: IgnoreMatcher) -> Self {
        Self {
            matcher: Arc::new(matcher),
        }
    }
}

/// Map a raw notify kind to ours; access and metadata-less events are dropped
pub(crate) fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Any => Some(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Translate one notify event into zero or more watch events
pub(crate) fn translate(repo: &Path, matcher: &IgnoreMatcher, event: Event) -> Vec<WatchEvent> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };

    if kind == ChangeKind::Deleted && event.paths.iter().any(|p| p == repo) {
        return vec![WatchEvent::Error {
            message: format!("repository root {} was removed", repo.display()),
        }];
    }

    event
        .paths
        .into_iter()
        .filter(|path| !matcher.is_ignored(repo, path))
        .map(|path| WatchEvent::Change(FileEvent::new(repo, path, kind)))
        .collect()
}

impl EventSource for NotifyEventSource {
    fn subscribe(&self, repo: &Path, sink: mpsc::UnboundedSender<WatchEvent>) -> Result<Subscription, WatchError> {
        debug!(repo = %repo.display(), "subscribe: called");
        if !repo.is_dir() {
            return Err(WatchError::RepositoryMissing(repo.to_path_buf()));
        }

        let repo_path: PathBuf = repo.to_path_buf();
        let matcher = Arc::clone(&self.matcher);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let events = match res {
                Ok(event) => translate(&repo_path, &matcher, event),
                Err(e) => {
                    warn!(repo = %repo_path.display(), error = %e, "Watcher error");
                    vec![WatchEvent::Error { message: e.to_string() }]
                }
            };
            for event in events {
                // Receiver gone means the tracker stopped; nothing left to notify.
                if sink.send(event).is_err() {
                    break;
                }
            }
        })
        .map_err(|source| WatchError::Subscribe {
            path: repo.to_path_buf(),
            source,
        })?;

        watcher
            .watch(repo, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Subscribe {
                path: repo.to_path_buf(),
                source,
            })?;

        debug!(repo = %repo.display(), "subscribe: watching");
        Ok(Subscription::new(watcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_change_kind_mapping() {
        assert_eq!(change_kind(&EventKind::Create(CreateKind::File)), Some(ChangeKind::Created));
        assert_eq!(
            change_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            change_kind(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            Some(ChangeKind::Renamed)
        );
        assert_eq!(change_kind(&EventKind::Remove(RemoveKind::File)), Some(ChangeKind::Deleted));
        assert_eq!(change_kind(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))), None);
    }

    #[test]
    fn test_translate_filters_ignored_paths() {
        let repo = Path::new("/repo");
        let matcher = IgnoreMatcher::new(&["target".to_string()]);
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/repo/src/lib.rs"))
            .add_path(PathBuf::from("/repo/target/out"))
            .add_path(PathBuf::from("/repo/.git/HEAD"));

        let events = translate(repo, &matcher, event);
        assert_eq!(events.len(), 1);
        match &events[0] {
            WatchEvent::Change(change) => {
                assert_eq!(change.file_path, PathBuf::from("/repo/src/lib.rs"));
                assert_eq!(change.kind, ChangeKind::Created);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_root_removal_is_error() {
        let repo = Path::new("/repo");
        let event = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(PathBuf::from("/repo"));
        let events = translate(repo, &IgnoreMatcher::default(), event);
        assert!(matches!(events.as_slice(), [WatchEvent::Error { .. }]));
    }

    #[test]
    fn test_subscribe_missing_repo_fails() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let source = NotifyEventSource::new(IgnoreMatcher::default());
        let result = source.subscribe(&temp.path().join("missing"), tx);
        assert!(matches!(result, Err(WatchError::RepositoryMissing(_))));
    }

    #[tokio::test]
    async fn test_real_watcher_delivers_changes() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = NotifyEventSource::new(IgnoreMatcher::default());
        let _subscription = source.subscribe(&repo, tx).unwrap();

        std::fs::write(repo.join("main.rs"), "fn main() {}\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        match event {
            WatchEvent::Change(change) => assert_eq!(change.file_path, repo.join("main.rs")),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
