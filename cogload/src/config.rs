//! cogload configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main cogload configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracker timing and threshold defaults
    pub daemon: DaemonConfig,

    /// Filesystem watcher configuration
    pub watcher: WatcherSettings,

    /// Complexity delta estimator
    pub estimator: EstimatorConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Default location of the user config file: ~/.config/cogload/cogload.yml
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cogload")
            .join("cogload.yml")
    }

    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.daemon.default_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(eyre::eyre!(
                "daemon.default-threshold must be a positive number, got {}",
                threshold
            ));
        }
        if self.daemon.debounce_ms == 0 {
            return Err(eyre::eyre!("daemon.debounce-ms must be greater than zero"));
        }
        if self.daemon.retry_backoff_ms == 0 || self.daemon.retry_backoff_max_ms < self.daemon.retry_backoff_ms {
            return Err(eyre::eyre!(
                "daemon.retry-backoff-ms must be > 0 and not exceed daemon.retry-backoff-max-ms"
            ));
        }
        if self.estimator.kind == EstimatorKind::Command && self.estimator.command.is_empty() {
            return Err(eyre::eyre!("estimator.command is required when estimator.kind is 'command'"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            if !path.exists() {
                tracing::info!("Config file {} does not exist yet, using defaults", path.display());
                return Ok(Self::default());
            }
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try user config: ~/.config/cogload/cogload.yml
        let user_config = Self::default_path();
        if user_config.exists() {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Write the configuration as YAML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(path, content).context(format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }
}

/// Tracker timing and threshold defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Threshold for repositories added without an explicit one
    #[serde(rename = "default-threshold")]
    pub default_threshold: f64,

    /// Quiet period after the last event before the threshold is evaluated
    #[serde(rename = "debounce-ms")]
    pub debounce_ms: u64,

    /// Upper bound on a single commit invocation
    #[serde(rename = "commit-timeout-ms")]
    pub commit_timeout_ms: u64,

    /// Upper bound on draining in-flight work at shutdown
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,

    /// First retry delay after a failed commit; doubles per consecutive failure
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,

    /// Cap for the retry delay
    #[serde(rename = "retry-backoff-max-ms")]
    pub retry_backoff_max_ms: u64,

    /// How often failed watcher subscriptions are retried
    #[serde(rename = "resubscribe-interval-ms")]
    pub resubscribe_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            default_threshold: 20.0,
            debounce_ms: 3_000,
            commit_timeout_ms: 60_000,
            shutdown_timeout_ms: 30_000,
            retry_backoff_ms: 30_000,
            retry_backoff_max_ms: 900_000,
            resubscribe_interval_ms: 60_000,
        }
    }
}

impl DaemonConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn resubscribe_interval(&self) -> Duration {
        Duration::from_millis(self.resubscribe_interval_ms)
    }

    /// Backoff before the repo leaves `error` after `failures` consecutive failures
    pub fn retry_backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        let delay = self.retry_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.retry_backoff_max_ms))
    }
}

/// Filesystem watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Glob patterns for paths that never produce events
    ///
    /// Each pattern is matched against every path component and against the
    /// repo-relative path. `.git` is always ignored regardless of this list.
    pub ignore: Vec<String>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            ignore: vec![
                ".git".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
                "*.swp".to_string(),
                "*~".to_string(),
            ],
        }
    }
}

/// Which delta estimator to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// Built-in decision-point counter
    #[default]
    Heuristic,
    /// External command printing a number
    Command,
}

/// Complexity delta estimator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub kind: EstimatorKind,

    /// Program and arguments; the changed file path is appended
    pub command: Vec<String>,

    /// Timeout for one estimator invocation
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Files larger than this are treated as zero delta
    #[serde(rename = "max-file-bytes")]
    pub max_file_bytes: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            kind: EstimatorKind::Heuristic,
            command: Vec::new(),
            timeout_ms: 10_000,
            max_file_bytes: 1024 * 1024,
        }
    }
}

impl EstimatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding repos.json, history.jsonl, audit.jsonl and daemon files
    ///
    /// Keep this outside every watched repository.
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/cogload on Linux)
        let state_dir = dirs::data_dir()
            .map(|d| d.join("cogload"))
            .unwrap_or_else(|| PathBuf::from(".cogload"));

        Self { state_dir }
    }
}

impl StorageConfig {
    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join("cogload.pid")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join("daemon.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.default_threshold, 20.0);
        assert_eq!(config.daemon.debounce_ms, 3_000);
        assert_eq!(config.estimator.kind, EstimatorKind::Heuristic);
        assert!(config.watcher.ignore.contains(&".git".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
daemon:
  default-threshold: 10
  debounce-ms: 500
  commit-timeout-ms: 5000
  retry-backoff-ms: 1000
  retry-backoff-max-ms: 8000

watcher:
  ignore: [".git", "build"]

estimator:
  kind: command
  command: ["radon-delta", "--json"]
  timeout-ms: 2000

storage:
  state-dir: /var/lib/cogload
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.daemon.default_threshold, 10.0);
        assert_eq!(config.daemon.debounce(), Duration::from_millis(500));
        assert_eq!(config.watcher.ignore, vec![".git", "build"]);
        assert_eq!(config.estimator.kind, EstimatorKind::Command);
        assert_eq!(config.estimator.command, vec!["radon-delta", "--json"]);
        assert_eq!(config.storage.state_dir, PathBuf::from("/var/lib/cogload"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
daemon:
  debounce-ms: 100
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.daemon.debounce_ms, 100);
        assert_eq!(config.daemon.default_threshold, 20.0);
        assert_eq!(config.daemon.shutdown_timeout_ms, 30_000);
        assert_eq!(config.estimator.kind, EstimatorKind::Heuristic);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.daemon.default_threshold = 0.0;
        assert!(config.validate().is_err());
        config.daemon.default_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_command_for_command_estimator() {
        let mut config = Config::default();
        config.estimator.kind = EstimatorKind::Command;
        assert!(config.validate().is_err());
        config.estimator.command = vec!["echo".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let daemon = DaemonConfig {
            retry_backoff_ms: 1_000,
            retry_backoff_max_ms: 5_000,
            ..Default::default()
        };
        assert_eq!(daemon.retry_backoff(1), Duration::from_millis(1_000));
        assert_eq!(daemon.retry_backoff(2), Duration::from_millis(2_000));
        assert_eq!(daemon.retry_backoff(3), Duration::from_millis(4_000));
        assert_eq!(daemon.retry_backoff(4), Duration::from_millis(5_000));
        assert_eq!(daemon.retry_backoff(60), Duration::from_millis(5_000));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("cogload.yml");

        let mut config = Config::default();
        config.daemon.default_threshold = 42.0;
        config.storage.state_dir = temp.path().join("state");
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.daemon.default_threshold, 42.0);
        assert_eq!(loaded.storage.state_dir, temp.path().join("state"));
    }

    #[test]
    fn test_load_missing_explicit_path_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.yml");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.daemon.default_threshold, 20.0);
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            state_dir: PathBuf::from("/tmp/cogload-state"),
        };
        assert_eq!(storage.pid_file(), PathBuf::from("/tmp/cogload-state/cogload.pid"));
        assert_eq!(storage.socket_path(), PathBuf::from("/tmp/cogload-state/daemon.sock"));
    }
}
