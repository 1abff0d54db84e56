//! CLI tests for cogload
//!
//! Each test gets its own config, state directory and data home, and runs
//! without a daemon so every command goes through the in-process path.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Env {
    temp: TempDir,
    config: PathBuf,
}

impl Env {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = temp.path().join("cogload.yml");
        let state_dir = temp.path().join("state");
        std::fs::write(
            &config,
            format!("daemon:\n  debounce-ms: 500\nstorage:\n  state-dir: {}\n", state_dir.display()),
        )
        .unwrap();
        Self { temp, config }
    }

    fn cmd(&self) -> Command {
        self.cmd_with(&self.config)
    }

    fn cmd_with(&self, config: &Path) -> Command {
        let mut cmd = Command::cargo_bin("cogload").unwrap();
        cmd.arg("--config")
            .arg(config)
            .env("XDG_DATA_HOME", self.temp.path().join("data"))
            .env("NO_COLOR", "1");
        cmd
    }

    /// Directory that looks like a repository root
    fn repo(&self, name: &str) -> PathBuf {
        let path = self.temp.path().join(name);
        std::fs::create_dir_all(path.join(".git")).unwrap();
        path.canonicalize().unwrap()
    }

    fn add(&self, path: &Path) {
        self.cmd()
            .args(["add", "--threshold", "10"])
            .arg(path)
            .assert()
            .success()
            .stdout(predicate::str::contains("Watching"));
    }
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("cogload")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("run-daemon").not());
}

#[test]
fn test_init_twice_is_a_warning() {
    let env = Env::new();
    let config = env.temp.path().join("fresh").join("cogload.yml");

    env.cmd_with(&config)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));
    assert!(config.exists());

    env.cmd_with(&config)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already initialized"));
}

#[test]
fn test_add_then_list() {
    let env = Env::new();
    let repo = env.repo("repoA");
    env.add(&repo);

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(repo.to_string_lossy().as_ref()))
        .stdout(predicate::str::contains("watching"))
        .stdout(predicate::str::contains("delta 0.0 / 10"));
}

#[test]
fn test_duplicate_and_nested_add_fail() {
    let env = Env::new();
    let outer = env.repo("outer");
    let inner = env.repo("outer/inner");
    env.add(&outer);

    env.cmd()
        .arg("add")
        .arg(&outer)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already watched"));

    env.cmd()
        .arg("add")
        .arg(&inner)
        .assert()
        .failure()
        .stderr(predicate::str::contains("overlaps"));
}

#[test]
fn test_add_non_repository_fails() {
    let env = Env::new();
    let plain = env.temp.path().join("plain");
    std::fs::create_dir_all(&plain).unwrap();

    env.cmd()
        .arg("add")
        .arg(&plain)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a valid repository"));
}

#[test]
fn test_remove_unknown_fails() {
    let env = Env::new();
    let repo = env.repo("repoA");
    env.add(&repo);

    env.cmd().arg("remove").arg(&repo).assert().success();
    env.cmd()
        .arg("remove")
        .arg(&repo)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not watched"));
}

#[test]
fn test_status_json() {
    let env = Env::new();
    let repo = env.repo("repoA");
    env.add(&repo);

    let output = env.cmd().args(["status", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["status"], "watching");
    assert_eq!(reports[0]["cumulative_delta"], 0.0);
    assert_eq!(reports[0]["threshold"], 10.0);
}

#[test]
fn test_reset_is_audited() {
    let env = Env::new();
    let repo = env.repo("repoA");
    env.add(&repo);

    env.cmd()
        .arg("reset")
        .arg(&repo)
        .assert()
        .success()
        .stdout(predicate::str::contains("previous delta 0.0"));

    env.cmd()
        .args(["history", "--audit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reset"))
        .stdout(predicate::str::contains("added"));

    env.cmd()
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No commits recorded"));
}

#[test]
fn test_pause_and_resume() {
    let env = Env::new();
    let repo = env.repo("repoA");
    env.add(&repo);

    env.cmd().arg("pause").arg(&repo).assert().success();
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("paused"));

    env.cmd()
        .arg("pause")
        .arg(&repo)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot pause"));

    env.cmd().arg("resume").arg(&repo).assert().success();
}

#[test]
fn test_commit_on_broken_repository_fails() {
    let env = Env::new();
    // An empty .git directory is not a usable repository
    let repo = env.repo("repoA");
    env.add(&repo);

    env.cmd()
        .arg("commit")
        .arg(&repo)
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"));

    env.cmd()
        .arg("history")
        .arg(&repo)
        .assert()
        .success()
        .stdout(predicate::str::contains("manual_force"));
}

#[test]
fn test_stop_without_daemon() {
    let env = Env::new();
    env.cmd()
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}
