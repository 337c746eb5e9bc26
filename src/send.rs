//! The send fabric: outbound events with four targeting modes.
//!
//! `Sender::event(route, payload)` builds a fluent dispatcher; the terminal
//! call picks the recipients — an explicit id list, rooms through the
//! transport publisher, or every live connection. A send failure on one
//! recipient never affects delivery to the others.

use crate::context;
use crate::frame::OutboundFrame;
use crate::router::Direction;
use crate::server::ServerInner;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Emits outbound frames. Obtained from `ctx.send` inside a request, from
/// [`crate::Server::sender`] outside any request, or resolved late through
/// [`ScopedSender`].
#[derive(Clone)]
pub struct Sender {
    inner: Arc<ServerInner>,
}

impl Sender {
    pub(crate) fn new(inner: Arc<ServerInner>) -> Self {
        Self { inner }
    }

    /// Stage an event on `route` with `payload`; pick targets with one of
    /// the dispatcher's terminal calls.
    pub fn event(&self, route: impl Into<String>, payload: impl Serialize) -> EventDispatch {
        let route = route.into();
        let payload = match serde_json::to_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(route = %route, error = %e, "event payload failed to serialize");
                None
            }
        };
        EventDispatch {
            inner: Some(self.inner.clone()),
            route,
            payload,
        }
    }
}

/// A staged event awaiting its targets.
#[must_use = "an event does nothing until a terminal call picks its targets"]
pub struct EventDispatch {
    inner: Option<Arc<ServerInner>>,
    route: String,
    payload: Option<Value>,
}

impl EventDispatch {
    fn dead(route: String) -> Self {
        Self {
            inner: None,
            route,
            payload: None,
        }
    }

    /// Coerce the payload through the route's outgoing schema (when the
    /// route is declared with one) and serialize the frame. Dynamic routes
    /// absent from the table are sent as-is.
    async fn resolve(route: &str, payload: Value, inner: &ServerInner) -> Option<String> {
        let coerced = match inner.table.get(route) {
            Some(entry) if entry.direction == Direction::Out => match &entry.schema {
                Some(schema) => match schema.validate(&payload).await {
                    Ok(value) => value,
                    Err(issues) => {
                        tracing::warn!(
                            route = %route,
                            issues = ?issues,
                            "outgoing payload failed schema coercion; event dropped"
                        );
                        return None;
                    }
                },
                None => payload,
            },
            _ => payload,
        };
        match serde_json::to_string(&OutboundFrame::event(route, coerced)) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(route = %route, error = %e, "event frame failed to serialize");
                None
            }
        }
    }

    /// Deliver to each listed client. Ids that are not currently connected
    /// are silently skipped.
    pub async fn to<I, S>(self, client_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (Some(inner), Some(payload)) = (self.inner, self.payload) else {
            return;
        };
        let Some(text) = Self::resolve(&self.route, payload, &inner).await else {
            return;
        };
        for client_id in client_ids {
            let client_id = client_id.as_ref();
            let Some(entry) = inner
                .connections
                .get(client_id)
                .map(|entry| entry.value().clone())
            else {
                continue;
            };
            if let Err(e) = entry.sink.send(&text).await {
                tracing::warn!(
                    client_id = %client_id,
                    route = %self.route,
                    error = %e,
                    "send failed"
                );
                if let Some(hook) = &inner.on_send_error {
                    (hook.as_ref())(client_id, &e);
                }
            }
        }
    }

    /// Deliver to every member of every listed room through the transport
    /// publisher. Without a registered publisher this logs a warning and
    /// does nothing: iterating members here would silently break the
    /// performance contract of room fan-out.
    pub async fn to_room<I, S>(self, rooms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (Some(inner), Some(payload)) = (self.inner, self.payload) else {
            return;
        };
        let Some(publisher) = inner.publisher.clone() else {
            tracing::warn!(
                route = %self.route,
                "to_room with no publisher registered; event dropped"
            );
            return;
        };
        let Some(text) = Self::resolve(&self.route, payload, &inner).await else {
            return;
        };
        for room in rooms {
            let room = room.as_ref();
            if let Err(e) = publisher.publish(room, &text).await {
                tracing::warn!(room = %room, route = %self.route, error = %e, "publish failed");
            }
        }
    }

    /// Deliver to every live connection. Valid with zero connections.
    pub async fn broadcast(self) {
        let (Some(inner), Some(payload)) = (self.inner, self.payload) else {
            return;
        };
        let Some(text) = Self::resolve(&self.route, payload, &inner).await else {
            return;
        };
        // Collect entries first: sink sends suspend, and DashMap shards must
        // not stay locked across await points.
        let entries: Vec<_> = inner
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for entry in entries {
            if let Err(e) = entry.sink.send(&text).await {
                tracing::warn!(
                    client_id = %entry.client_id,
                    route = %self.route,
                    error = %e,
                    "broadcast send failed"
                );
                if let Some(hook) = &inner.on_send_error {
                    (hook.as_ref())(&entry.client_id, &e);
                }
            }
        }
    }
}

/// A sender capturable at router-definition time, before any server or
/// connection exists. Each `event` call resolves the request currently being
/// dispatched through the ambient context store; outside a request scope the
/// staged event is dropped with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedSender;

impl ScopedSender {
    pub fn new() -> Self {
        Self
    }

    pub fn event(&self, route: impl Into<String>, payload: impl Serialize) -> EventDispatch {
        let route = route.into();
        match context::current() {
            Some(ctx) => ctx.send.event(route, payload),
            None => {
                tracing::warn!(
                    route = %route,
                    "scoped sender used outside a request scope; event dropped"
                );
                EventDispatch::dead(route)
            }
        }
    }
}
