//! Complexity delta estimation
//!
//! A `DeltaEstimator` turns one file-change event into a signed score. The
//! tracker treats any error as a zero delta, so implementations are free to
//! fail loudly.

mod command;
mod heuristic;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use tracing::debug;

use crate::config::{EstimatorConfig, EstimatorKind};

pub use command::CommandEstimator;
pub use heuristic::{HeuristicEstimator, decision_points, is_source_file};

/// Produces the complexity delta attributed to a single changed file
#[async_trait]
pub trait DeltaEstimator: Send + Sync {
    /// Estimate the change in complexity caused by the latest edit of `file`
    async fn estimate_delta(&self, repo: &Path, file: &Path) -> Result<f64>;
}

/// Build the estimator selected by the configuration
pub fn build_estimator(config: &EstimatorConfig) -> Result<Arc<dyn DeltaEstimator>> {
    debug!(kind = ?config.kind, "build_estimator: called");
    match config.kind {
        EstimatorKind::Heuristic => Ok(Arc::new(HeuristicEstimator::new(config.max_file_bytes))),
        EstimatorKind::Command => {
            let estimator = CommandEstimator::new(config.command.clone(), config.timeout())?;
            Ok(Arc::new(estimator))
        }
    }
}
