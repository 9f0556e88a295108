//! Relay HTTP + WebSocket server (single port).

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::relay::client::ClientHandle;
use crate::relay::hub::{Hub, HubHandle};
use crate::relay::pump;

/// Shared state for the relay routes.
#[derive(Clone)]
struct RelayState {
    hub: HubHandle,
}

/// Run the relay server; binds to config.relay.bind:port.
/// Blocks until shutdown (Ctrl+C or SIGTERM); in-flight connections keep
/// relaying until they close on their own.
pub async fn run_relay(config: Config) -> Result<()> {
    let (hub, handle) = Hub::new();
    tokio::spawn(hub.run());

    let state = RelayState { hub: handle };
    let app = Router::new()
        .route("/health", get(health_http))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let bind_addr = format!("{}:{}", config.relay.bind, config.relay.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("relay listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping accept loop");
}

/// GET /health returns status and the number of registered players.
async fn health_http(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "players": state.hub.client_count().await,
    }))
}

#[derive(Deserialize)]
struct WsQuery {
    player_id: Option<String>,
}

/// GET /ws upgrades to WebSocket and joins the relay under `player_id`
/// (or a synthesized id when the query parameter is absent).
async fn ws_handler(
    State(state): State<RelayState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let player_id = query
        .player_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(synthesize_player_id);
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, state.hub))
}

/// Fallback id for clients that connect without one: local time, second resolution.
fn synthesize_player_id() -> String {
    format!("player_{}", chrono::Local::now().format("%Y%m%d%H%M%S"))
}

/// Register the client with the hub and run its pump pair. The writer runs as
/// its own task; the reader runs here so the connection handler lives exactly
/// as long as the inbound side. Whichever pump exits first closes the socket;
/// the other fails its next operation and winds down.
async fn handle_socket(socket: WebSocket, player_id: String, hub: HubHandle) {
    let (client, outbound_rx) = ClientHandle::new(player_id.clone());
    let conn_seq = client.conn_seq();
    hub.register(client).await;

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(pump::write_pump(ws_tx, outbound_rx));
    pump::read_pump(ws_rx, player_id, conn_seq, hub).await;
    let _ = writer.await;
}
