//! Router tree and startup flattening.
//!
//! A router is a nested namespace whose leaves are procedures: incoming
//! message handlers (optionally RPC) or outgoing event declarations. At
//! server build time the tree is flattened into a `dotted.path -> procedure`
//! table; the tree itself is discarded. Everything that can go wrong here is
//! a configuration error surfaced by [`crate::Server::builder`], never a
//! runtime error.

use crate::context::RequestContext;
use crate::frame::RPC_RESPONSE_TYPE;
use crate::schema::Schema;
use crate::BoxError;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Which way a procedure's payload travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server; has middleware and a handler, may return a value.
    In,
    /// Server to client; declared so clients can type their subscriptions.
    Out,
}

/// What a middleware or handler receives: the per-request context plus the
/// validated payload.
pub struct Request {
    pub ctx: Arc<RequestContext>,
    pub input: Value,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>;

/// Boxed handler: runs after the middleware chain; its return value becomes
/// the RPC reply payload when the frame carried an `rpcId`.
pub type Handler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Boxed middleware: returns a JSON object shallow-merged into the request
/// context, or an error that silently aborts the request.
pub type Middleware = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Configuration errors raised while flattening a router. All of these abort
/// server construction.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("duplicate route: {0}")]
    DuplicateRoute(String),
    #[error("route {0} has both a co-located and a mapped handler")]
    DuplicateHandler(String),
    #[error("handler mapped to unknown route: {0}")]
    UnknownHandlerRoute(String),
    #[error("handler attached to outgoing route: {0}")]
    HandlerOnOutgoing(String),
    #[error("incoming route {0} has no handler")]
    MissingHandler(String),
    #[error("route {0} uses the reserved segment {RPC_RESPONSE_TYPE}")]
    ReservedSegment(String),
    #[error("route {0} contains an empty or dotted segment")]
    InvalidSegment(String),
}

/// A leaf of the router tree.
pub struct Procedure {
    direction: Direction,
    schema: Option<Arc<dyn Schema>>,
    middleware: Vec<Middleware>,
    handler: Option<Handler>,
}

impl Procedure {
    /// An incoming procedure whose payload is validated against `schema`.
    pub fn incoming<S: Schema + 'static>(schema: S) -> Self {
        Self {
            direction: Direction::In,
            schema: Some(Arc::new(schema)),
            middleware: Vec::new(),
            handler: None,
        }
    }

    /// An incoming procedure that accepts any payload unvalidated.
    pub fn incoming_raw() -> Self {
        Self {
            direction: Direction::In,
            schema: None,
            middleware: Vec::new(),
            handler: None,
        }
    }

    /// An outgoing event declaration; payloads are coerced through `schema`
    /// on emission.
    pub fn outgoing<S: Schema + 'static>(schema: S) -> Self {
        Self {
            direction: Direction::Out,
            schema: Some(Arc::new(schema)),
            middleware: Vec::new(),
            handler: None,
        }
    }

    /// An outgoing event declaration without a payload schema.
    pub fn outgoing_raw() -> Self {
        Self {
            direction: Direction::Out,
            schema: None,
            middleware: Vec::new(),
            handler: None,
        }
    }

    /// Append a middleware. Middleware run in declaration order before the
    /// handler; the first error aborts the request without a reply.
    pub fn middleware<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.middleware.push(Arc::new(move |req| Box::pin(f(req))));
        self
    }

    /// Attach the handler (new style, co-located with the declaration).
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |req| Box::pin(f(req))));
        self
    }
}

enum RouteNode {
    Router(Router),
    Procedure(Procedure),
}

/// A nested namespace of procedures, flattened at server build time.
#[derive(Default)]
pub struct Router {
    entries: Vec<(String, RouteNode)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a sub-router under `name`.
    pub fn nest(mut self, name: impl Into<String>, router: Router) -> Self {
        self.entries.push((name.into(), RouteNode::Router(router)));
        self
    }

    /// Declare a procedure under `name`.
    pub fn procedure(mut self, name: impl Into<String>, procedure: Procedure) -> Self {
        self.entries
            .push((name.into(), RouteNode::Procedure(procedure)));
        self
    }

    /// Depth-first flatten into the dispatch table, attaching any handlers
    /// supplied through the legacy parallel map.
    pub(crate) fn flatten(
        self,
        extra: HandlerMap,
    ) -> Result<HashMap<String, Arc<ProcedureEntry>>, RouterError> {
        let mut table = HashMap::new();
        let mut prefix = Vec::new();
        walk(self, &mut prefix, &mut table)?;

        for (path, handler) in extra.map {
            match table.get_mut(&path) {
                None => return Err(RouterError::UnknownHandlerRoute(path)),
                Some(entry) => {
                    if entry.direction == Direction::Out {
                        return Err(RouterError::HandlerOnOutgoing(path));
                    }
                    if entry.handler.is_some() {
                        return Err(RouterError::DuplicateHandler(path));
                    }
                    entry.handler = Some(handler);
                }
            }
        }

        for (path, entry) in &table {
            match entry.direction {
                Direction::In => {
                    if entry.handler.is_none() {
                        return Err(RouterError::MissingHandler(path.clone()));
                    }
                }
                Direction::Out => {
                    if entry.handler.is_some() {
                        return Err(RouterError::HandlerOnOutgoing(path.clone()));
                    }
                }
            }
        }

        Ok(table
            .into_iter()
            .map(|(path, entry)| (path, Arc::new(entry)))
            .collect())
    }
}

fn walk(
    router: Router,
    prefix: &mut Vec<String>,
    table: &mut HashMap<String, ProcedureEntry>,
) -> Result<(), RouterError> {
    for (name, node) in router.entries {
        let at = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix.join("."), name)
        };
        if name.is_empty() || name.contains('.') {
            return Err(RouterError::InvalidSegment(at));
        }
        if name == RPC_RESPONSE_TYPE {
            return Err(RouterError::ReservedSegment(at));
        }
        match node {
            RouteNode::Router(sub) => {
                prefix.push(name);
                walk(sub, prefix, table)?;
                prefix.pop();
            }
            RouteNode::Procedure(procedure) => {
                if table.contains_key(&at) {
                    return Err(RouterError::DuplicateRoute(at));
                }
                table.insert(
                    at,
                    ProcedureEntry {
                        direction: procedure.direction,
                        schema: procedure.schema,
                        middleware: procedure.middleware,
                        handler: procedure.handler,
                    },
                );
            }
        }
    }
    Ok(())
}

/// Legacy style: handlers keyed by dotted path, parallel to the declaration
/// tree, attached during flattening.
#[derive(Default)]
pub struct HandlerMap {
    map: HashMap<String, Handler>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F, Fut>(mut self, route: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.map
            .insert(route.into(), Arc::new(move |req| Box::pin(f(req))));
        self
    }
}

/// One flattened dispatch-table entry.
pub(crate) struct ProcedureEntry {
    pub(crate) direction: Direction,
    pub(crate) schema: Option<Arc<dyn Schema>>,
    pub(crate) middleware: Vec<Middleware>,
    pub(crate) handler: Option<Handler>,
}

impl std::fmt::Debug for ProcedureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureEntry")
            .field("direction", &self.direction)
            .field("schema", &self.schema.is_some())
            .field("middleware_len", &self.middleware.len())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AnySchema;
    use serde_json::json;

    fn noop() -> Procedure {
        Procedure::incoming(AnySchema).handler(|_req| async move { Ok(json!(null)) })
    }

    #[test]
    fn test_flatten_nested_paths() {
        let table = Router::new()
            .nest(
                "chat",
                Router::new().nest("room", Router::new().procedure("join", noop())),
            )
            .procedure("ping", noop())
            .flatten(HandlerMap::new())
            .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.contains_key("chat.room.join"));
        assert!(table.contains_key("ping"));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let err = Router::new()
            .procedure("ping", noop())
            .procedure("ping", noop())
            .flatten(HandlerMap::new())
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateRoute(path) if path == "ping"));
    }

    #[test]
    fn test_reserved_segment_rejected() {
        let err = Router::new()
            .nest("a", Router::new().procedure("__rpc_res", noop()))
            .flatten(HandlerMap::new())
            .unwrap_err();
        assert!(matches!(err, RouterError::ReservedSegment(path) if path == "a.__rpc_res"));
    }

    #[test]
    fn test_dotted_segment_rejected() {
        let err = Router::new()
            .procedure("a.b", noop())
            .flatten(HandlerMap::new())
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidSegment(_)));
    }

    #[test]
    fn test_incoming_without_handler_rejected() {
        let err = Router::new()
            .procedure("ping", Procedure::incoming(AnySchema))
            .flatten(HandlerMap::new())
            .unwrap_err();
        assert!(matches!(err, RouterError::MissingHandler(path) if path == "ping"));
    }

    #[test]
    fn test_handler_on_outgoing_rejected() {
        let err = Router::new()
            .procedure(
                "onEvent",
                Procedure::outgoing(AnySchema).handler(|_req| async move { Ok(json!(null)) }),
            )
            .flatten(HandlerMap::new())
            .unwrap_err();
        assert!(matches!(err, RouterError::HandlerOnOutgoing(path) if path == "onEvent"));
    }

    #[test]
    fn test_legacy_handler_map_attaches() {
        let table = Router::new()
            .procedure("ping", Procedure::incoming(AnySchema))
            .flatten(HandlerMap::new().with("ping", |_req| async move { Ok(json!("pong")) }))
            .unwrap();
        assert!(table["ping"].handler.is_some());
    }

    #[test]
    fn test_legacy_handler_for_unknown_route_rejected() {
        let err = Router::new()
            .procedure("ping", Procedure::incoming(AnySchema))
            .flatten(HandlerMap::new().with("pong", |_req| async move { Ok(json!(null)) }))
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownHandlerRoute(path) if path == "pong"));
    }

    #[test]
    fn test_both_handler_styles_rejected() {
        let err = Router::new()
            .procedure("ping", noop())
            .flatten(HandlerMap::new().with("ping", |_req| async move { Ok(json!(null)) }))
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateHandler(path) if path == "ping"));
    }

    #[test]
    fn test_legacy_handler_on_outgoing_rejected() {
        let err = Router::new()
            .procedure("onEvent", Procedure::outgoing(AnySchema))
            .flatten(HandlerMap::new().with("onEvent", |_req| async move { Ok(json!(null)) }))
            .unwrap_err();
        assert!(matches!(err, RouterError::HandlerOnOutgoing(path) if path == "onEvent"));
    }
}
