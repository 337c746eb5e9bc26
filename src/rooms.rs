//! Room subscription bookkeeping, exposed to handlers as `ctx.rooms`.
//!
//! A room is nothing but its membership: the per-connection subscription set
//! lives on the connection entry, and the room-to-members index is the
//! transport adapter's topic table. Empty rooms are never materialised
//! anywhere.

use crate::send::Sender;
use crate::server::{ConnectionEntry, ServerInner};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Room operations bound to one connection. Cloneable; all clones share the
/// connection's subscription set.
#[derive(Clone)]
pub struct RoomOperations {
    entry: Arc<ConnectionEntry>,
    inner: Arc<ServerInner>,
}

impl RoomOperations {
    pub(crate) fn new(entry: Arc<ConnectionEntry>, inner: Arc<ServerInner>) -> Self {
        Self { entry, inner }
    }

    /// Add this connection to `room` and subscribe its sink to the topic.
    /// Idempotent: joining a room twice is a single membership.
    pub async fn join(&self, room: &str) {
        let added = self
            .entry
            .subscriptions
            .lock()
            .map(|mut subs| subs.insert(room.to_string()))
            .unwrap_or(false);
        if added {
            self.entry.sink.subscribe(room).await;
            tracing::debug!(client_id = %self.entry.client_id, room = %room, "joined room");
        }
    }

    /// Remove this connection from `room`. Leaving a room the connection is
    /// not in is a no-op.
    pub async fn leave(&self, room: &str) {
        let removed = self
            .entry
            .subscriptions
            .lock()
            .map(|mut subs| subs.remove(room))
            .unwrap_or(false);
        if removed {
            self.entry.sink.unsubscribe(room).await;
            tracing::debug!(client_id = %self.entry.client_id, room = %room, "left room");
        }
    }

    /// Emit an event on a dynamic dotted route to every member of `room`.
    /// Shortcut for `send.event(route, payload).to_room([room])`; bypasses
    /// the typed sender on purpose for room-scoped events whose route is
    /// only known at runtime.
    pub async fn broadcast(&self, room: &str, route: &str, payload: impl Serialize) {
        Sender::new(self.inner.clone())
            .event(route, payload)
            .to_room([room])
            .await;
    }

    /// Read-only snapshot of this connection's subscription set.
    pub fn current(&self) -> BTreeSet<String> {
        self.entry
            .subscriptions
            .lock()
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    /// Membership predicate.
    pub fn has(&self, room: &str) -> bool {
        self.entry
            .subscriptions
            .lock()
            .map(|subs| subs.contains(room))
            .unwrap_or(false)
    }
}
