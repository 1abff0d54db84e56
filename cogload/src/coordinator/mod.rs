//! Daemon coordinator
//!
//! Owns every watched repository, runs one tracker per repository and
//! exposes the control operations behind the CLI.

mod core;
mod handle;
mod messages;

pub use core::{Collaborators, Coordinator, TransitionReply};
pub use handle::CoordinatorHandle;
pub use messages::{CommitOutcome, CoordRequest, InitOutcome, RepoReport};
