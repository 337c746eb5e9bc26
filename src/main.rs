//! Demo chat server built on the zocket runtime: an echo RPC, room-scoped
//! chat, and an admin-gated broadcast, served over the axum WebSocket
//! adapter.

use axum::routing::get;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use zocket::config::{generate_config_template, Config};
use zocket::ws::{upgrade_handler, Fabric, WsState};
use zocket::{typed, Procedure, Request, Router, ScopedSender, Server};

/// Handshake metadata: `name` is required, `role` defaults to "user".
/// Browsers pass these as query parameters on the WebSocket URL.
#[derive(Debug, Serialize, Deserialize)]
struct Handshake {
    name: String,
    #[serde(default = "default_role")]
    role: String,
}

fn default_role() -> String {
    "user".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct PingInput {
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RoomInput {
    room: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SayInput {
    room: String,
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NoticeInput {
    text: String,
}

fn chat_router() -> Router {
    // Captured before any server or connection exists; resolves the live
    // request through the ambient context store at call time.
    let send = ScopedSender::new();

    Router::new()
        .nest(
            "echo",
            Router::new()
                .procedure(
                    "ping",
                    Procedure::incoming(typed::<PingInput>()).handler(|req| async move {
                        let Request { ctx, input } = req;
                        let input: PingInput = serde_json::from_value(input)?;
                        let reply = format!("pong: {}", input.message);
                        ctx.send
                            .event("echo.onPong", json!({"reply": reply}))
                            .to([ctx.client_id.as_str()])
                            .await;
                        Ok(json!(reply))
                    }),
                )
                .procedure("onPong", Procedure::outgoing(typed::<Pong>())),
        )
        .nest(
            "rooms",
            Router::new()
                .procedure(
                    "join",
                    Procedure::incoming(typed::<RoomInput>()).handler(move |req| async move {
                        let Request { ctx, input } = req;
                        let input: RoomInput = serde_json::from_value(input)?;
                        let room = input.room;
                        ctx.rooms.join(&room).await;
                        let name = ctx.get("name").unwrap_or(Value::Null);
                        send.event("rooms.onJoin", json!({"room": room, "name": name}))
                            .to_room([room.as_str()])
                            .await;
                        Ok(json!({"joined": room}))
                    }),
                )
                .procedure(
                    "leave",
                    Procedure::incoming(typed::<RoomInput>()).handler(|req| async move {
                        let input: RoomInput = serde_json::from_value(req.input)?;
                        req.ctx.rooms.leave(&input.room).await;
                        Ok(json!({"left": input.room}))
                    }),
                )
                .procedure(
                    "say",
                    Procedure::incoming(typed::<SayInput>()).handler(|req| async move {
                        let Request { ctx, input } = req;
                        let input: SayInput = serde_json::from_value(input)?;
                        let name = ctx.get("name").unwrap_or(Value::Null);
                        ctx.send
                            .event("rooms.onSay", json!({"from": name, "text": input.text}))
                            .to_room([input.room.as_str()])
                            .await;
                        Ok(Value::Null)
                    }),
                )
                .procedure("onJoin", Procedure::outgoing_raw())
                .procedure("onSay", Procedure::outgoing_raw()),
        )
        .nest(
            "admin",
            Router::new()
                .procedure(
                    "notice",
                    Procedure::incoming(typed::<NoticeInput>())
                        .middleware(|req| async move {
                            match req.ctx.get("role") {
                                Some(Value::String(role)) if role == "admin" => Ok(json!({})),
                                _ => Err("not an admin".into()),
                            }
                        })
                        .handler(|req| async move {
                            let input: NoticeInput = serde_json::from_value(req.input)?;
                            req.ctx
                                .send
                                .event("admin.onNotice", json!({"text": input.text}))
                                .broadcast()
                                .await;
                            Ok(Value::Null)
                        }),
                )
                .procedure("onNotice", Procedure::outgoing_raw()),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "zocket=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "zocket=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("zocket demo server v{} starting", env!("CARGO_PKG_VERSION"));

    let fabric = Fabric::new();
    let server = Server::builder(chat_router())
        .handshake_schema(typed::<Handshake>())
        .on_connect(|values, client_id| async move {
            tracing::info!(client_id = %client_id, values = %values, "client connected");
            // The validated handshake bag becomes the user context verbatim.
            Ok((*values).clone())
        })
        .on_disconnect(|disconnect| async move {
            tracing::info!(
                client_id = %disconnect.client_id,
                rooms = ?disconnect.rooms,
                "client disconnected"
            );
            Ok(())
        })
        .publisher(fabric.clone())
        .build()?;

    let app = axum::Router::new()
        .route("/ws", get(upgrade_handler))
        .with_state(WsState::new(server, fabric));

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
