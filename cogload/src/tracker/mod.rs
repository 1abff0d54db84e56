//! Repository tracker
//!
//! Per-repository state machine: accumulates deltas, debounces bursts and
//! decides when the threshold is crossed.

mod core;
mod handle;
mod messages;

pub use core::{TrackerContext, spawn};
pub use handle::TrackerHandle;
pub use messages::{TrackerCounters, TrackerInput, TrackerSnapshot};
