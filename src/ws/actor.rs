//! Actor-per-connection: the reader loop and writer task for one socket.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::ws::fabric::WsSink;
use crate::ws::WsState;

/// Server sends a WebSocket ping every 30 seconds; prevents connection leaks
/// from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// If no pong arrives within 10 seconds of a ping, the connection is closed.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor for an accepted connection.
///
/// Splits the socket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel.
/// - Reader loop: feeds inbound text frames to the core, one at a time, so
///   frames from this connection dispatch in receive order.
///
/// `handle_open` completes before the reader starts, so frames the client
/// fires right after its handshake wait in the socket buffer until the
/// connection is dispatch-ready. `handle_close` runs on every exit path.
pub async fn run_connection(socket: WebSocket, state: WsState, client_id: String, values: Value) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let sink = Arc::new(WsSink::new(client_id.clone(), tx.clone(), state.fabric.clone()));

    // Writer first: lifecycle hooks and handlers may push immediately. It
    // exits on its own once every sender clone is gone or the socket fails.
    tokio::spawn(writer_task(ws_sender, rx));

    if state
        .server
        .handle_open(sink, client_id.clone(), values)
        .await
        .is_err()
    {
        // Never fully opened. The core queued a close frame; dropping our
        // sender lets the writer drain it and exit.
        drop(tx);
        return;
    }

    tracing::debug!(client_id = %client_id, "WebSocket actor started");

    // Ping task: periodic pings, close on pong timeout.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_client_id = client_id.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the immediate first tick.
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer is gone; so is the connection.
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(client_id = %ping_client_id, "pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    state.server.handle_message(&client_id, text.as_str()).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        client_id = %client_id,
                        "ignoring binary frame (wire frames are JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::debug!(
                        client_id = %client_id,
                        reason = ?frame,
                        "client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(client_id = %client_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::debug!(client_id = %client_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    state.server.handle_close(&client_id).await;

    // handle_close dropped the connection entry and its topic
    // registrations; with our local sender gone the writer drains whatever
    // is queued and exits once every remaining sender is gone.
    drop(tx);

    tracing::debug!(client_id = %client_id, "WebSocket actor stopped");
}

/// Writer task: forwards queued messages to the socket sink until every
/// sender is dropped or the transport fails.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}
