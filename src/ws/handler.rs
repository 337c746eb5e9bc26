//! WebSocket upgrade endpoint.
//!
//! Collects protocol headers and URL query parameters, runs the core
//! handshake, and either rejects with HTTP 400 before any upgrade happens or
//! upgrades and hands the socket to the connection actor.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::server::{HandshakeRequest, Server};
use crate::ws::{actor, Fabric};

/// Axum state for the upgrade endpoint: the core plus the topic fabric the
/// endpoint mints sinks against.
#[derive(Clone)]
pub struct WsState {
    pub server: Server,
    pub fabric: Arc<Fabric>,
}

impl WsState {
    pub fn new(server: Server, fabric: Arc<Fabric>) -> Self {
        Self { server, fabric }
    }
}

/// `GET /ws` upgrade endpoint. Handshake metadata comes from both protocol
/// headers and the query string (the query is how browsers ferry "headers"
/// through WebSocket constructors that forbid custom headers); validation
/// failure is an HTTP 400 with the issues in the body, and the transport is
/// never upgraded.
pub async fn upgrade_handler(
    State(state): State<WsState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let mut header_values = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            header_values.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let request = HandshakeRequest {
        headers: header_values,
        query,
    };
    match state.server.handle_upgrade(request).await {
        Ok(accept) => {
            tracing::info!(client_id = %accept.client_id, "WebSocket handshake accepted");
            ws.on_upgrade(move |socket| {
                actor::run_connection(socket, state, accept.client_id, accept.values)
            })
        }
        Err(reject) => {
            tracing::warn!(status = reject.status, "WebSocket handshake rejected");
            let status =
                StatusCode::from_u16(reject.status).unwrap_or(StatusCode::BAD_REQUEST);
            (status, Json(reject.body)).into_response()
        }
    }
}
