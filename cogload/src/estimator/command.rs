//! External command estimator
//!
//! Runs a user-supplied program with the changed file appended to its
//! arguments and reads a single number from stdout.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result, bail, eyre};
use tokio::process::Command;
use tracing::debug;

use super::DeltaEstimator;

#[derive(Debug, Clone)]
pub struct CommandEstimator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandEstimator {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| eyre!("estimator.command must name a program"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }
}

#[async_trait]
impl DeltaEstimator for CommandEstimator {
    async fn estimate_delta(&self, repo: &Path, file: &Path) -> Result<f64> {
        debug!(program = %self.program, file = %file.display(), "estimate_delta: called");

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(file)
            .current_dir(repo)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| eyre!("{} timed out after {:?}", self.program, self.timeout))?
            .context(format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let delta: f64 = stdout
            .trim()
            .parse()
            .context(format!("{} printed a non-numeric delta: {:?}", self.program, stdout.trim()))?;
        if !delta.is_finite() {
            bail!("{} printed a non-finite delta", self.program);
        }
        Ok(delta)
    }
}
