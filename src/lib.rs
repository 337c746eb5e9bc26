//! Zocket: a bidirectional RPC-and-event server runtime over a single
//! long-lived duplex stream (in practice a WebSocket).
//!
//! A server advertises a router — a nested namespace of incoming procedures
//! and outgoing event channels. Clients invoke procedures (optionally
//! RPC-style, correlated by `rpcId`) and receive events the server pushes to
//! one connection, an explicit set, a room, or everyone. The demo binary in
//! `main.rs` is a complete working service built on this crate.

pub mod config;
pub mod context;
pub mod frame;
pub mod rooms;
pub mod router;
pub mod schema;
pub mod send;
pub mod server;
pub mod transport;
pub mod ws;

mod dispatch;

pub use context::RequestContext;
pub use frame::{InboundFrame, OutboundFrame, RPC_RESPONSE_TYPE};
pub use rooms::RoomOperations;
pub use router::{Direction, HandlerMap, Procedure, Request, Router, RouterError};
pub use schema::{typed, AnySchema, Schema, SchemaIssue, TypedSchema};
pub use send::{EventDispatch, ScopedSender, Sender};
pub use server::{
    Disconnect, HandshakeAccept, HandshakeReject, HandshakeRequest, Server, ServerBuilder,
};
pub use transport::{ConnectionSink, Publisher, TransportError};

/// Error type for user-supplied handlers, middleware, and lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
