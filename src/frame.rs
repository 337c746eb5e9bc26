//! Wire frames: UTF-8 JSON objects exchanged over the duplex stream.
//!
//! Inbound frames carry a dotted route in `type`, an optional `payload`, and
//! an optional `rpcId` correlation token. Outbound frames are either events
//! (`{type, payload}`) or RPC replies (`{type: "__rpc_res", payload, rpcId}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved outbound frame type for RPC replies. Rejected as a route segment
/// at router build time so user routes can never collide with it.
pub const RPC_RESPONSE_TYPE: &str = "__rpc_res";

/// A parsed inbound frame.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InboundFrame {
    /// Dotted route path identifying the target procedure.
    #[serde(rename = "type")]
    pub route: String,
    /// Raw payload, validated against the procedure's schema before dispatch.
    #[serde(default)]
    pub payload: Option<Value>,
    /// Correlation token; present iff the client expects a reply.
    #[serde(rename = "rpcId", default)]
    pub rpc_id: Option<String>,
}

/// An outbound frame, serialized and handed to a connection sink.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub route: String,
    pub payload: Value,
    #[serde(rename = "rpcId", skip_serializing_if = "Option::is_none")]
    pub rpc_id: Option<String>,
}

impl OutboundFrame {
    /// An event or server push on the given route.
    pub fn event(route: impl Into<String>, payload: Value) -> Self {
        Self {
            route: route.into(),
            payload,
            rpc_id: None,
        }
    }

    /// The reply to an RPC frame, correlated by `rpc_id`.
    pub fn rpc_response(payload: Value, rpc_id: String) -> Self {
        Self {
            route: RPC_RESPONSE_TYPE.to_string(),
            payload,
            rpc_id: Some(rpc_id),
        }
    }
}
