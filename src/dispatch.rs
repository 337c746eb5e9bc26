//! The dispatch engine: one inbound frame in, at most one RPC reply out.
//!
//! Pipeline per frame: parse, await the connection's published context, look
//! the route up, validate the payload, run the middleware chain and the
//! handler under the ambient request scope, then correlate the reply if the
//! frame carried an `rpcId`. Every failure is scoped to the frame and logged;
//! nothing here is fatal to the connection, let alone the server.
//!
//! Deliberate silences: a payload that fails validation, a middleware that
//! errors, and a handler that errors all drop without a reply even when
//! `rpcId` is present. Middleware commonly implements authorization and must
//! not reveal whether a procedure exists; the client's RPC correlation is
//! left to time out.

use crate::context::{self, RequestContext};
use crate::frame::{InboundFrame, OutboundFrame};
use crate::router::{Direction, Request};
use crate::server::{ContextCell, ServerInner};
use serde_json::Value;
use std::sync::Arc;

pub(crate) async fn handle_frame(inner: &Arc<ServerInner>, client_id: &str, raw: &str) {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "malformed frame dropped");
            return;
        }
    };

    let Some(entry) = inner
        .connections
        .get(client_id)
        .map(|entry| entry.value().clone())
    else {
        tracing::debug!(client_id = %client_id, "frame from unknown connection dropped");
        return;
    };

    // Defer until on_connect has published the user context; frames in the
    // pre-open window park here in arrival order instead of being dropped.
    let mut context_rx = entry.context_rx.clone();
    let user_context = {
        let cell = match context_rx
            .wait_for(|cell| !matches!(cell, ContextCell::Pending))
            .await
        {
            Ok(cell) => cell,
            Err(_) => {
                tracing::debug!(client_id = %client_id, "connection gone before dispatch");
                return;
            }
        };
        match &*cell {
            ContextCell::Ready(value) => value.clone(),
            _ => {
                tracing::debug!(client_id = %client_id, "connection aborted before dispatch");
                return;
            }
        }
    };

    let Some(procedure) = inner.table.get(&frame.route).cloned() else {
        tracing::warn!(client_id = %client_id, route = %frame.route, "unknown route dropped");
        return;
    };
    if procedure.direction != Direction::In {
        tracing::warn!(
            client_id = %client_id,
            route = %frame.route,
            "inbound frame addressed an outgoing route"
        );
        return;
    }

    let payload = frame.payload.unwrap_or(Value::Null);
    let input = match &procedure.schema {
        Some(schema) => match schema.validate(&payload).await {
            Ok(value) => value,
            Err(issues) => {
                tracing::warn!(
                    client_id = %client_id,
                    route = %frame.route,
                    issues = ?issues,
                    "payload validation failed; frame dropped"
                );
                return;
            }
        },
        None => payload,
    };

    let ctx = Arc::new(RequestContext::new(
        entry.clone(),
        inner.clone(),
        (*user_context).clone(),
    ));

    let route = frame.route;
    let rpc_id = frame.rpc_id;
    let inner = inner.clone();
    context::scope(ctx.clone(), async move {
        for middleware in &procedure.middleware {
            let request = Request {
                ctx: ctx.clone(),
                input: input.clone(),
            };
            match (middleware.as_ref())(request).await {
                Ok(patch) => ctx.merge(patch),
                Err(e) => {
                    tracing::warn!(
                        client_id = %ctx.client_id,
                        route = %route,
                        error = %e,
                        "middleware rejected request"
                    );
                    return;
                }
            }
        }

        // Build-time validation guarantees incoming routes carry a handler.
        let Some(handler) = &procedure.handler else {
            return;
        };
        let request = Request {
            ctx: ctx.clone(),
            input,
        };
        match (handler.as_ref())(request).await {
            Ok(value) => {
                if let Some(rpc_id) = rpc_id {
                    reply(&inner, &entry, &route, value, rpc_id).await;
                }
            }
            Err(e) => {
                tracing::error!(
                    client_id = %ctx.client_id,
                    route = %route,
                    error = %e,
                    "handler failed; reply suppressed"
                );
            }
        }
    })
    .await;
}

async fn reply(
    inner: &Arc<ServerInner>,
    entry: &Arc<crate::server::ConnectionEntry>,
    route: &str,
    value: Value,
    rpc_id: String,
) {
    let frame = OutboundFrame::rpc_response(value, rpc_id);
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(route = %route, error = %e, "rpc reply failed to serialize");
            return;
        }
    };
    if let Err(e) = entry.sink.send(&text).await {
        tracing::warn!(
            client_id = %entry.client_id,
            route = %route,
            error = %e,
            "rpc reply send failed"
        );
        if let Some(hook) = &inner.on_send_error {
            (hook.as_ref())(&entry.client_id, &e);
        }
    }
}
