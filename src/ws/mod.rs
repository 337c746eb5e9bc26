//! Axum WebSocket transport adapter.
//!
//! The only code in the crate that touches the wire. One actor per
//! connection: a reader loop that feeds the core and a writer task that owns
//! the socket sink, joined by an unbounded channel any part of the system can
//! clone a sender for.

pub mod actor;
pub mod fabric;
pub mod handler;

use tokio::sync::mpsc;

pub use fabric::Fabric;
pub use handler::{upgrade_handler, WsState};

/// Sender half of a connection's writer channel. Cloning this is how frames
/// reach a specific client from anywhere in the system.
pub type WriterTx = mpsc::UnboundedSender<axum::extract::ws::Message>;
