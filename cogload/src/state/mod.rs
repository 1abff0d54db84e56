//! Config & persistence store with actor pattern
//!
//! StateManager owns the StateStore and processes messages via channels,
//! giving every tracker a single, serialized writer to the state directory.

mod manager;
mod messages;
mod store;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
pub use store::StateStore;
