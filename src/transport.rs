//! The narrow boundary between the core and a concrete duplex transport.
//!
//! The core never touches bytes: it hands serialized frames to a
//! [`ConnectionSink`] and room traffic to a [`Publisher`]. A transport
//! adapter implements these two traits and drives the core through
//! [`crate::Server::handle_upgrade`], [`crate::Server::handle_open`],
//! [`crate::Server::handle_message`], and [`crate::Server::handle_close`].
//! The axum WebSocket adapter in [`crate::ws`] is the shipped implementation.

use async_trait::async_trait;
use core::fmt;
use thiserror::Error;

/// Transport-level send failure. Never fatal to the server; surfaced through
/// the optional per-connection send-error callback.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Transport(String),
}

/// The per-connection outbound surface the core writes to.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Queue one serialized frame for delivery to this connection.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Initiate transport-level close.
    async fn close(&self);

    /// Subscribe this connection's sink to a topic for published traffic.
    async fn subscribe(&self, topic: &str);

    /// Symmetric to [`ConnectionSink::subscribe`].
    async fn unsubscribe(&self, topic: &str);
}

impl fmt::Debug for dyn ConnectionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ConnectionSink}}")
    }
}

/// Server-level topic fan-out. Materially cheaper than iterating members,
/// which is why `to_room` refuses to fall back to iteration when no
/// publisher is registered.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, frame: &str) -> Result<(), TransportError>;
}

impl fmt::Debug for dyn Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Publisher}}")
    }
}
