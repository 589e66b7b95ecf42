//! The browser-facing websocket server.
//!
//! One axum route. Each socket gets a reader task (this function) and a
//! writer task draining the client's send queue; broadcasts from other
//! tasks land on the queue, never on the socket directly, so writes
//! never interleave.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};

use meshgate_services::protocol::ServerEvent;

use crate::bridge::Bridge;

pub async fn serve(bridge: Arc<Bridge>) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .with_state(bridge.clone());

    let addr = format!("{}:{}", bridge.config.api.bind, bridge.config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "websocket API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_upgrade(State(bridge): State<Arc<Bridge>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, bridge))
}

async fn handle_socket(socket: WebSocket, bridge: Arc<Bridge>) {
    let (mut sink, mut stream) = socket.split();
    let (client_id, mut queue) = bridge.clients.register();
    tracing::info!(client = client_id, clients = bridge.clients.count(), "browser connected");

    // Initial snapshot for the new browser
    bridge.clients.send_to(
        client_id,
        &ServerEvent::Status {
            connected: bridge.is_connected(),
        },
    );
    bridge.clients.send_to(client_id, &bridge.subscriptions_event());

    let writer = tokio::spawn(async move {
        while let Some(text) = queue.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => bridge.handle_command(client_id, &text).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    bridge.clients.unregister(client_id);
    writer.abort();
    tracing::info!(client = client_id, "browser disconnected");
}
