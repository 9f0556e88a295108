//! Per-connection pumps: one reader and one writer task per client.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};

use crate::relay::hub::HubHandle;
use crate::relay::protocol::FrameMessage;

/// A connection with no pong for this long is considered dead.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Upper bound on any single write to the socket.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Ping period. Kept below READ_DEADLINE so a pong refreshes the peer's
/// deadline before it can expire.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);

/// Drain inbound frames from the socket into the hub's broadcast path.
///
/// Undecodable frames are dropped without ending the connection. The read
/// deadline is refreshed by pong receipt only. On exit (error, closure, or
/// deadline) the client is unregistered from the hub; this is the only
/// disconnect signal the hub gets when the client side initiates teardown.
pub async fn read_pump(
    mut ws_rx: SplitStream<WebSocket>,
    player_id: String,
    conn_seq: u64,
    hub: HubHandle,
) {
    let mut deadline = Instant::now() + READ_DEADLINE;
    loop {
        let msg = match timeout_at(deadline, ws_rx.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                log::warn!("read error for player {}: {}", player_id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                log::debug!("read deadline exceeded for player {}", player_id);
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                let Ok(mut frame) = FrameMessage::decode(&text) else {
                    log::debug!("dropping undecodable frame from player {}", player_id);
                    continue;
                };
                frame.stamp();
                let Ok(encoded) = frame.encode() else {
                    continue;
                };
                if hub.broadcast(encoded).await.is_err() {
                    break;
                }
            }
            Message::Pong(_) => {
                deadline = Instant::now() + READ_DEADLINE;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    hub.unregister(player_id, conn_seq).await;
}

/// Flush the outbound queue to the socket and emit keepalive pings.
///
/// Messages already buffered when a write happens are coalesced into the same
/// frame, newline-separated. This is best effort and never waits for more.
/// The queue closing (hub unregister or eviction) is the stop signal: a close
/// frame is sent and the pump ends. The writer never unregisters the client
/// itself.
pub async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            msg = outbound_rx.recv() => {
                let Some(mut payload) = msg else {
                    let _ = timeout(WRITE_DEADLINE, ws_tx.send(Message::Close(None))).await;
                    break;
                };
                while let Ok(next) = outbound_rx.try_recv() {
                    payload.push('\n');
                    payload.push_str(&next);
                }
                match timeout(WRITE_DEADLINE, ws_tx.send(Message::Text(payload))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            _ = keepalive.tick() => {
                match timeout(WRITE_DEADLINE, ws_tx.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}
