//! Server core: connection lifecycle, live table, and the four callbacks a
//! transport adapter drives.
//!
//! Connections progress handshake-accepted -> open -> closed. Between open
//! and the completion of the user `on_connect` hook the connection is
//! registered but not dispatch-ready; frames arriving in that window park on
//! the connection's pending-context cell instead of being dropped.

use crate::dispatch;
use crate::router::{HandlerMap, ProcedureEntry, Router, RouterError};
use crate::schema::Schema;
use crate::send::Sender;
use crate::transport::{ConnectionSink, Publisher, TransportError};
use crate::BoxError;
use dashmap::DashMap;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

type HookFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>;

/// Runs after a successful handshake; its return value becomes the
/// connection's user context.
pub type ConnectHook = Arc<dyn Fn(Arc<Value>, String) -> HookFuture<Value> + Send + Sync>;

/// Runs exactly once per opened connection, before teardown.
pub type DisconnectHook = Arc<dyn Fn(Disconnect) -> HookFuture<()> + Send + Sync>;

/// Observes per-recipient transport send failures. Non-fatal by contract.
pub type SendErrorHook = Arc<dyn Fn(&str, &TransportError) + Send + Sync>;

/// What `on_disconnect` observes: the user context and the final
/// subscription set, captured before either is torn down.
#[derive(Debug, Clone)]
pub struct Disconnect {
    pub client_id: String,
    pub user_context: Value,
    pub rooms: BTreeSet<String>,
}

/// Handshake metadata handed to [`Server::handle_upgrade`] by the adapter:
/// protocol headers plus URL query parameters. The query string is how
/// browsers ferry "headers" through WebSocket constructors that forbid
/// custom headers, so query wins on conflict.
#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

/// A successful handshake: the minted client id and the validated metadata.
#[derive(Debug, Clone)]
pub struct HandshakeAccept {
    pub client_id: String,
    pub values: Value,
}

/// A rejected handshake, rendered by the adapter as an HTTP error before
/// any upgrade happens.
#[derive(Debug, Clone)]
pub struct HandshakeReject {
    pub status: u16,
    pub body: Value,
}

/// Dispatch readiness of a connection's user context.
pub(crate) enum ContextCell {
    /// `on_connect` still running; frames park here.
    Pending,
    /// Context published; dispatch may proceed.
    Ready(Arc<Value>),
    /// `on_connect` failed; parked frames are dropped.
    Aborted,
}

/// One live connection.
pub(crate) struct ConnectionEntry {
    pub(crate) client_id: String,
    pub(crate) handshake: Arc<Value>,
    pub(crate) sink: Arc<dyn ConnectionSink>,
    pub(crate) subscriptions: Mutex<BTreeSet<String>>,
    pub(crate) context_tx: watch::Sender<ContextCell>,
    pub(crate) context_rx: watch::Receiver<ContextCell>,
}

pub(crate) struct ServerInner {
    pub(crate) table: HashMap<String, Arc<ProcedureEntry>>,
    pub(crate) connections: DashMap<String, Arc<ConnectionEntry>>,
    pub(crate) publisher: Option<Arc<dyn Publisher>>,
    pub(crate) handshake_schema: Option<Arc<dyn Schema>>,
    pub(crate) on_connect: Option<ConnectHook>,
    pub(crate) on_disconnect: Option<DisconnectHook>,
    pub(crate) on_send_error: Option<SendErrorHook>,
}

/// The Zocket server runtime. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Server {
    pub(crate) inner: Arc<ServerInner>,
}

impl Server {
    /// Start configuring a server around a router declaration.
    pub fn builder(router: Router) -> ServerBuilder {
        ServerBuilder {
            router,
            handlers: HandlerMap::new(),
            handshake_schema: None,
            on_connect: None,
            on_disconnect: None,
            on_send_error: None,
            publisher: None,
        }
    }

    /// A sender working against the global connection table, for push from
    /// outside any request. `broadcast` before any connection has opened is
    /// a valid no-op; `to_room` goes through the publisher regardless.
    pub fn sender(&self) -> Sender {
        Sender::new(self.inner.clone())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Whether `client_id` is currently in the live table.
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.inner.connections.contains_key(client_id)
    }

    /// Validate handshake metadata and mint a client id. Headers and query
    /// parameters are merged (query wins); failure is an HTTP 400 with the
    /// validator's issues in the body, and the connection is never opened.
    pub async fn handle_upgrade(
        &self,
        request: HandshakeRequest,
    ) -> Result<HandshakeAccept, HandshakeReject> {
        let mut merged = Map::new();
        for (key, value) in request.headers {
            merged.insert(key, Value::String(value));
        }
        for (key, value) in request.query {
            merged.insert(key, Value::String(value));
        }
        let raw = Value::Object(merged);

        let values = match &self.inner.handshake_schema {
            Some(schema) => schema.validate(&raw).await.map_err(|issues| {
                tracing::warn!(issues = ?issues, "handshake validation failed");
                HandshakeReject {
                    status: 400,
                    body: json!({"error": "Invalid headers", "details": issues}),
                }
            })?,
            None => raw,
        };

        let client_id = mint_client_id();
        tracing::debug!(client_id = %client_id, "handshake accepted");
        Ok(HandshakeAccept { client_id, values })
    }

    /// Register the connection, run `on_connect`, and publish its user
    /// context. An `on_connect` error means the connection never fully
    /// opened: it is deregistered, its sink closed, and `on_disconnect` is
    /// not invoked.
    pub async fn handle_open(
        &self,
        sink: Arc<dyn ConnectionSink>,
        client_id: String,
        values: Value,
    ) -> Result<(), BoxError> {
        let (context_tx, context_rx) = watch::channel(ContextCell::Pending);
        let entry = Arc::new(ConnectionEntry {
            client_id: client_id.clone(),
            handshake: Arc::new(values),
            sink,
            subscriptions: Mutex::new(BTreeSet::new()),
            context_tx,
            context_rx,
        });
        self.inner.connections.insert(client_id.clone(), entry.clone());

        let user_context = match &self.inner.on_connect {
            Some(hook) => match (hook.as_ref())(entry.handshake.clone(), client_id.clone()).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(
                        client_id = %client_id,
                        error = %e,
                        "on_connect failed; connection never fully opened"
                    );
                    self.inner.connections.remove(&client_id);
                    let _ = entry.context_tx.send(ContextCell::Aborted);
                    entry.sink.close().await;
                    return Err(e);
                }
            },
            None => Value::Null,
        };

        let _ = entry
            .context_tx
            .send(ContextCell::Ready(Arc::new(user_context)));
        tracing::info!(client_id = %client_id, "connection open");
        Ok(())
    }

    /// Dispatch one inbound frame from `client_id`. Every failure mode is
    /// scoped to the frame; this never returns an error to the transport.
    pub async fn handle_message(&self, client_id: &str, raw: &str) {
        dispatch::handle_frame(&self.inner, client_id, raw).await;
    }

    /// Tear a connection down: `on_disconnect` observes the final
    /// subscription set, then the connection leaves the live table and every
    /// topic. Idempotent; the second call for an id is a no-op.
    pub async fn handle_close(&self, client_id: &str) {
        let Some((_, entry)) = self.inner.connections.remove(client_id) else {
            return;
        };
        let rooms = entry
            .subscriptions
            .lock()
            .map(|subs| subs.clone())
            .unwrap_or_default();
        let user_context = match &*entry.context_rx.borrow() {
            ContextCell::Ready(value) => (**value).clone(),
            _ => Value::Null,
        };

        if let Some(hook) = &self.inner.on_disconnect {
            if let Err(e) = (hook.as_ref())(Disconnect {
                client_id: client_id.to_string(),
                user_context,
                rooms: rooms.clone(),
            })
            .await
            {
                tracing::error!(client_id = %client_id, error = %e, "on_disconnect failed");
            }
        }

        for room in &rooms {
            entry.sink.unsubscribe(room).await;
        }
        if let Ok(mut subs) = entry.subscriptions.lock() {
            subs.clear();
        }
        tracing::info!(client_id = %client_id, "connection closed");
    }

    /// Force-close a connection at the transport level. Teardown then runs
    /// through the adapter's normal close path.
    pub async fn close(&self, client_id: &str) {
        let Some(entry) = self
            .inner
            .connections
            .get(client_id)
            .map(|entry| entry.value().clone())
        else {
            return;
        };
        tracing::info!(client_id = %client_id, "force-closing connection");
        entry.sink.close().await;
    }
}

/// Configures and builds a [`Server`]. Router flattening happens in
/// [`ServerBuilder::build`], so every declaration error surfaces at startup.
pub struct ServerBuilder {
    router: Router,
    handlers: HandlerMap,
    handshake_schema: Option<Arc<dyn Schema>>,
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
    on_send_error: Option<SendErrorHook>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl ServerBuilder {
    /// Supply handlers through the legacy parallel map instead of (or in
    /// addition to) co-locating them on procedures.
    pub fn handlers(mut self, handlers: HandlerMap) -> Self {
        self.handlers = handlers;
        self
    }

    /// Schema for the merged handshake metadata bag. Without one, the merged
    /// bag is accepted as-is.
    pub fn handshake_schema<S: Schema + 'static>(mut self, schema: S) -> Self {
        self.handshake_schema = Some(Arc::new(schema));
        self
    }

    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Value>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move |values, client_id| {
            Box::pin(f(values, client_id))
        }));
        self
    }

    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Disconnect) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_disconnect = Some(Arc::new(move |disconnect| Box::pin(f(disconnect))));
        self
    }

    pub fn on_send_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &TransportError) + Send + Sync + 'static,
    {
        self.on_send_error = Some(Arc::new(f));
        self
    }

    /// Register the transport's topic publisher. Room fan-out requires one.
    pub fn publisher<P: Publisher + 'static>(mut self, publisher: Arc<P>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Flatten the router and assemble the server.
    pub fn build(self) -> Result<Server, RouterError> {
        let table = self.router.flatten(self.handlers)?;
        tracing::debug!(routes = table.len(), "dispatch table built");
        Ok(Server {
            inner: Arc::new(ServerInner {
                table,
                connections: DashMap::new(),
                publisher: self.publisher,
                handshake_schema: self.handshake_schema,
                on_connect: self.on_connect,
                on_disconnect: self.on_disconnect,
                on_send_error: self.on_send_error,
            }),
        })
    }
}

/// `client_<epoch_ms>_<base36_random>`: unique among live connections,
/// opaque to clients, not cryptographic.
fn mint_client_id() -> String {
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("client_{}_{}", epoch_ms, base36(rand::rng().random::<u64>()))
}

fn base36(mut n: u64) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_id_shape() {
        let id = mint_client_id();
        let mut parts = id.splitn(3, '_');
        assert_eq!(parts.next(), Some("client"));
        let epoch: u128 = parts.next().unwrap().parse().unwrap();
        assert!(epoch > 0);
        let suffix = parts.next().unwrap();
        assert!(!suffix.is_empty());
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_client_ids_distinct() {
        let a = mint_client_id();
        let b = mint_client_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_base36_round_digits() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
    }
}
