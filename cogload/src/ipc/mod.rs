//! Inter-Process Communication between the CLI and the daemon
//!
//! Unix Domain Socket at `<state-dir>/daemon.sock`, one JSON request and one
//! JSON response per connection.

pub mod client;
pub mod listener;
pub mod messages;

pub use client::DaemonClient;
pub use listener::{cleanup_socket, create_listener_at, dispatch, serve};
pub use messages::{DaemonMessage, DaemonResponse};
