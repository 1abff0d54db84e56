//! Decision-point heuristic
//!
//! Scores a file by counting branch keywords and short-circuit operators,
//! a cheap stand-in for cyclomatic complexity. The delta for an event is the
//! score change against the last version this estimator saw, with the `HEAD`
//! version as baseline the first time a file shows up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::Result;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use super::DeltaEstimator;

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "scala", "c", "h", "cc", "cpp", "hpp", "cs", "rb",
    "swift", "php", "sh",
];

const DECISION_KEYWORDS: &[&str] = &[
    "if", "elif", "for", "while", "loop", "match", "case", "catch", "except", "when", "guard",
];

const COMMENT_PREFIXES: &[&str] = &["//", "#", "/*", "*", "--"];

/// True if the extension is one the heuristic knows how to score
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Count decision points in source text, skipping comment lines
pub fn decision_points(source: &str) -> u32 {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !COMMENT_PREFIXES.iter().any(|p| line.starts_with(p)))
        .map(|line| {
            let keywords = line
                .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .filter(|word| DECISION_KEYWORDS.contains(word))
                .count();
            let operators = line.matches("&&").count() + line.matches("||").count();
            (keywords + operators) as u32
        })
        .sum()
}

/// Built-in estimator backed by `decision_points`
#[derive(Debug)]
pub struct HeuristicEstimator {
    max_file_bytes: u64,
    scores: Mutex<HashMap<PathBuf, u32>>,
}

impl HeuristicEstimator {
    pub fn new(max_file_bytes: u64) -> Self {
        Self {
            max_file_bytes,
            scores: Mutex::new(HashMap::new()),
        }
    }

    /// Score of the committed version, 0 if the file is new or git is unavailable
    async fn head_score(repo: &Path, file: &Path) -> u32 {
        let Ok(relative) = file.strip_prefix(repo) else {
            return 0;
        };
        let spec = format!("HEAD:{}", relative.to_string_lossy().replace('\\', "/"));
        match Command::new("git").args(["show", &spec]).current_dir(repo).kill_on_drop(true).output().await {
            Ok(output) if output.status.success() => decision_points(&String::from_utf8_lossy(&output.stdout)),
            Ok(_) => 0,
            Err(e) => {
                debug!(error = %e, "head_score: git unavailable");
                0
            }
        }
    }

    async fn current_score(&self, file: &Path) -> Result<Option<u32>> {
        let metadata = match tokio::fs::metadata(file).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        if metadata.len() > self.max_file_bytes {
            debug!(file = %file.display(), size = metadata.len(), "current_score: file too large, scoring as unchanged");
            return Ok(Some(self.scores.lock().await.get(file).copied().unwrap_or(0)));
        }
        let bytes = tokio::fs::read(file).await?;
        Ok(Some(decision_points(&String::from_utf8_lossy(&bytes))))
    }
}

#[async_trait]
impl DeltaEstimator for HeuristicEstimator {
    async fn estimate_delta(&self, repo: &Path, file: &Path) -> Result<f64> {
        debug!(repo = %repo.display(), file = %file.display(), "estimate_delta: called");
        if !is_source_file(file) {
            return Ok(0.0);
        }

        let cached = self.scores.lock().await.get(file).copied();
        let previous = match cached {
            Some(score) => score,
            None => Self::head_score(repo, file).await,
        };

        let current = self.current_score(file).await?;
        let mut scores = self.scores.lock().await;
        let delta = match current {
            Some(score) => {
                scores.insert(file.to_path_buf(), score);
                f64::from(score) - f64::from(previous)
            }
            None => {
                scores.remove(file);
                -f64::from(previous)
            }
        };

        debug!(file = %file.display(), previous, delta, "estimate_delta: scored");
        Ok(delta)
    }
}
