//! Daemon process management
//!
//! Handles detaching, PID file management, and process control.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

/// Poll interval while waiting for a stopped daemon to exit
const STOP_POLL: Duration = Duration::from_millis(100);

/// Daemon process manager
#[derive(Debug)]
pub struct DaemonManager {
    /// Path to the PID file
    pid_file: PathBuf,
}

impl DaemonManager {
    /// Manager for the daemon owning this state directory
    pub fn new(storage: &StorageConfig) -> Self {
        Self::with_pid_file(storage.pid_file())
    }

    /// Create a daemon manager with a custom PID file path
    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        debug!(?pid_file, "DaemonManager::with_pid_file: called");
        Self { pid_file }
    }

    /// Check if a daemon is running
    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Get the running daemon's PID
    pub fn running_pid(&self) -> Option<u32> {
        let result = self.read_pid().filter(|&pid| is_process_running(pid));
        debug!(?result, "DaemonManager::running_pid: returning");
        result
    }

    /// Read the PID from the PID file
    fn read_pid(&self) -> Option<u32> {
        if !self.pid_file.exists() {
            debug!(?self.pid_file, "DaemonManager::read_pid: pid file does not exist");
            return None;
        }

        let mut file = fs::File::open(&self.pid_file).ok()?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).ok()?;

        contents.trim().parse().ok()
    }

    /// Write the PID to the PID file
    fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).context("Failed to create PID file directory")?;
        }

        let mut file = fs::File::create(&self.pid_file).context("Failed to create PID file")?;
        write!(file, "{}", pid).context("Failed to write PID")?;

        debug!(pid, path = ?self.pid_file, "Wrote PID file");
        Ok(())
    }

    /// Remove the PID file
    pub fn remove_pid_file(&self) -> Result<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file).context("Failed to remove PID file")?;
            debug!(path = ?self.pid_file, "Removed PID file");
        }
        Ok(())
    }

    /// Spawn `cogload run-daemon` in the background and return its PID
    pub fn start(&self, config_path: Option<&Path>, verbose: bool) -> Result<u32> {
        debug!(?config_path, "DaemonManager::start: called");
        if let Some(pid) = self.running_pid() {
            return Err(eyre::eyre!("Daemon already running with PID {}", pid));
        }

        info!("Starting daemon...");
        let exe = std::env::current_exe().context("Failed to get current executable")?;

        let mut command = Command::new(&exe);
        if let Some(path) = config_path {
            command.arg("--config").arg(path);
        }
        if verbose {
            command.arg("--verbose");
        }
        let child = command
            .arg("run-daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        let pid = child.id();
        self.write_pid(pid)?;

        info!(pid, "Daemon started");
        Ok(pid)
    }

    /// Send SIGTERM and wait up to `grace` for the daemon to exit
    ///
    /// Falls back to SIGKILL once the grace period is over.
    pub fn stop(&self, grace: Duration) -> Result<u32> {
        let pid = self.running_pid().ok_or_else(|| eyre::eyre!("Daemon is not running"))?;

        info!(pid, "Stopping daemon...");
        signal(pid, nix::sys::signal::Signal::SIGTERM).context("Failed to send SIGTERM")?;

        let deadline = Instant::now() + grace;
        while is_process_running(pid) && Instant::now() < deadline {
            std::thread::sleep(STOP_POLL);
        }

        if is_process_running(pid) {
            warn!(pid, "Daemon did not stop gracefully, sending SIGKILL");
            let _ = signal(pid, nix::sys::signal::Signal::SIGKILL);
        }

        self.remove_pid_file()?;
        info!(pid, "Daemon stopped");
        Ok(pid)
    }

    /// Register the current process as the daemon
    pub fn register_self(&self) -> Result<()> {
        let pid = std::process::id();
        self.write_pid(pid)?;
        info!(pid, version = env!("CARGO_PKG_VERSION"), "Daemon registered");
        Ok(())
    }

    /// Get the PID file path
    pub fn pid_file(&self) -> &PathBuf {
        &self.pid_file
    }
}

fn signal(pid: u32, sig: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), sig)
}

/// Check if a process with the given PID is running
fn is_process_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // Signal 0 checks existence without affecting the process
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pid_file_lives_in_state_dir() {
        let storage = StorageConfig {
            state_dir: PathBuf::from("/tmp/cogload-state"),
        };
        let manager = DaemonManager::new(&storage);
        assert_eq!(manager.pid_file(), &PathBuf::from("/tmp/cogload-state/cogload.pid"));
    }

    #[test]
    fn test_is_not_running_when_no_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::with_pid_file(temp_dir.path().join("nonexistent.pid"));
        assert!(!manager.is_running());
        assert!(manager.stop(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_write_and_read_pid() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::with_pid_file(temp_dir.path().join("state").join("test.pid"));

        manager.write_pid(12345).unwrap();
        assert_eq!(manager.read_pid(), Some(12345));

        manager.remove_pid_file().unwrap();
        assert_eq!(manager.read_pid(), None);
    }

    #[test]
    fn test_register_self_is_running() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DaemonManager::with_pid_file(temp_dir.path().join("test.pid"));

        manager.register_self().unwrap();
        assert_eq!(manager.running_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_pid_file_is_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("test.pid");
        std::fs::write(&pid_file, "not-a-pid").unwrap();

        let manager = DaemonManager::with_pid_file(pid_file);
        assert!(!manager.is_running());
    }
}
