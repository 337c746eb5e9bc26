//! Per-request context and the ambient context store.
//!
//! Each inbound frame gets a context seeded with a shallow copy of the
//! connection's user context; middleware refine it by returning JSON objects
//! that are shallow-merged in. The context is also installed as a tokio
//! task-local for the span of the request, so helpers declared far from the
//! handler (the scoped sender in particular) can reach it without threading.

use crate::rooms::RoomOperations;
use crate::send::Sender;
use crate::server::{ConnectionEntry, ServerInner};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// The context visible to middleware and handlers for one request.
pub struct RequestContext {
    /// Server-assigned id of the originating connection.
    pub client_id: String,
    /// Validated handshake metadata for the originating connection.
    pub handshake: Arc<Value>,
    /// Room operations bound to the originating connection.
    pub rooms: RoomOperations,
    /// Sender for events and pushes; targets are chosen per call.
    pub send: Sender,
    state: Mutex<Value>,
}

impl RequestContext {
    pub(crate) fn new(entry: Arc<ConnectionEntry>, inner: Arc<ServerInner>, seed: Value) -> Self {
        Self {
            client_id: entry.client_id.clone(),
            handshake: entry.handshake.clone(),
            rooms: RoomOperations::new(entry, inner.clone()),
            send: Sender::new(inner),
            state: Mutex::new(seed),
        }
    }

    /// Snapshot of the request state (user context plus middleware merges).
    pub fn state(&self) -> Value {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or(Value::Null)
    }

    /// Look up one key in the request state, when the state is an object.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.get(key).cloned())
    }

    /// Shallow-merge a middleware return value into the request state.
    /// Object over object merges keys; object over null replaces; anything
    /// else is ignored.
    pub(crate) fn merge(&self, patch: Value) {
        let Value::Object(patch) = patch else {
            if !patch.is_null() {
                tracing::debug!(
                    client_id = %self.client_id,
                    "non-object middleware value ignored"
                );
            }
            return;
        };
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match &mut *state {
            Value::Object(map) => {
                for (key, value) in patch {
                    map.insert(key, value);
                }
            }
            Value::Null => *state = Value::Object(patch),
            _ => {
                tracing::debug!(
                    client_id = %self.client_id,
                    "middleware merge skipped: request state is not an object"
                );
            }
        }
    }
}

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

/// The context of the request currently being dispatched on this task, if
/// any. Handlers receive their context directly; this is for helpers called
/// from inside a request without an explicit context argument.
pub fn current() -> Option<Arc<RequestContext>> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

/// Run `fut` with `ctx` installed as the ambient request context, across all
/// of its suspension points.
pub(crate) async fn scope<F: Future>(ctx: Arc<RequestContext>, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}
