//! Ignore rules for watcher events

use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use tracing::warn;

/// Decides which paths never reach a tracker
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
    excluded_dirs: Vec<PathBuf>,
}

impl IgnoreMatcher {
    /// Compile glob patterns; invalid ones are skipped with a warning
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "Ignoring invalid watcher ignore pattern");
                    None
                }
            })
            .collect();
        Self {
            patterns,
            excluded_dirs: Vec::new(),
        }
    }

    /// Ignore everything below `dir` (absolute)
    pub fn with_excluded_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded_dirs.push(dir.into());
        self
    }

    pub fn is_ignored(&self, repo: &Path, path: &Path) -> bool {
        if self.excluded_dirs.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }

        let relative = path.strip_prefix(repo).unwrap_or(path);
        let components: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();

        if components.contains(&".git") {
            return true;
        }

        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative) || components.iter().any(|c| pattern.matches(c)))
    }
}
