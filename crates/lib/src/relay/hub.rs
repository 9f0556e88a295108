//! The relay hub: owns the client registry and the dispatch loop.
//!
//! One perpetual task selects over registration, deregistration, broadcast,
//! and the frame tick. Pumps and HTTP handlers talk to it through a cloneable
//! [`HubHandle`]; the registry container never leaves this module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio::sync::{mpsc, RwLock};

use crate::relay::client::ClientHandle;

/// Hub inbound frame queue depth (producers: every reader pump).
pub const BROADCAST_CAPACITY: usize = 256;

/// Frame counter tick, ~60 Hz.
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);

type Registry = Arc<RwLock<HashMap<String, ClientHandle>>>;

/// Deregistration request: id plus the connection serial it was registered
/// under, so a replaced connection's late teardown cannot remove its successor.
#[derive(Debug)]
struct Unregister {
    id: String,
    conn_seq: u64,
}

/// The hub task state. Create with [`Hub::new`], then spawn [`Hub::run`].
pub struct Hub {
    registry: Registry,
    frame_num: Arc<AtomicI64>,
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<Unregister>,
    broadcast_rx: mpsc::Receiver<String>,
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    registry: Registry,
    frame_num: Arc<AtomicI64>,
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<Unregister>,
    broadcast_tx: mpsc::Sender<String>,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let frame_num = Arc::new(AtomicI64::new(0));
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);
        let hub = Self {
            registry: registry.clone(),
            frame_num: frame_num.clone(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = HubHandle {
            registry,
            frame_num,
            register_tx,
            unregister_tx,
            broadcast_tx,
        };
        (hub, handle)
    }

    /// The dispatch loop. Runs for the life of the process.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                Some(client) = self.register_rx.recv() => self.register(client).await,
                Some(req) = self.unregister_rx.recv() => self.unregister(req).await,
                Some(message) = self.broadcast_rx.recv() => self.dispatch(message).await,
                _ = ticker.tick() => {
                    self.frame_num.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    async fn register(&self, client: ClientHandle) {
        let mut registry = self.registry.write().await;
        let id = client.id().to_string();
        if registry.insert(id.clone(), client).is_some() {
            // Duplicate id: dropping the displaced entry closes its queue,
            // which stops its writer pump and tears the old connection down.
            log::warn!("player {} re-registered, closing the previous connection", id);
        }
        log::info!("player {} connected, total players: {}", id, registry.len());
    }

    async fn unregister(&self, req: Unregister) {
        let mut registry = self.registry.write().await;
        let owned = registry
            .get(&req.id)
            .is_some_and(|c| c.conn_seq() == req.conn_seq);
        if owned {
            registry.remove(&req.id);
            log::info!(
                "player {} disconnected, total players: {}",
                req.id,
                registry.len()
            );
        }
    }

    /// Offer the message to every registered client's queue, non-blocking.
    /// Clients whose queue is full (or whose writer is already gone) are
    /// evicted on the spot; the message is neither retried nor buffered.
    async fn dispatch(&self, message: String) {
        let mut evicted: Vec<(String, u64)> = Vec::new();
        {
            let registry = self.registry.read().await;
            for (id, client) in registry.iter() {
                match client.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::warn!("player {} queue full, evicting", id);
                        evicted.push((id.clone(), client.conn_seq()));
                    }
                    Err(TrySendError::Closed(_)) => {
                        evicted.push((id.clone(), client.conn_seq()));
                    }
                }
            }
        }
        if evicted.is_empty() {
            return;
        }
        let mut registry = self.registry.write().await;
        for (id, conn_seq) in evicted {
            if registry.get(&id).is_some_and(|c| c.conn_seq() == conn_seq) {
                registry.remove(&id);
                log::info!("player {} evicted, total players: {}", id, registry.len());
            }
        }
    }
}

impl HubHandle {
    /// Hand a client over to the hub. The hub owns it from here on.
    pub async fn register(&self, client: ClientHandle) {
        let _ = self.register_tx.send(client).await;
    }

    /// Remove the registry entry for `id` if it still belongs to `conn_seq`.
    /// A no-op for unknown ids or entries from a newer connection.
    pub async fn unregister(&self, id: String, conn_seq: u64) {
        let _ = self.unregister_tx.send(Unregister { id, conn_seq }).await;
    }

    /// Submit an already-encoded frame for fan-out to every client.
    pub async fn broadcast(&self, message: String) -> Result<(), SendError<String>> {
        self.broadcast_tx.send(message).await
    }

    /// Number of registered players (unique ids, not connection count).
    pub async fn client_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Current relay frame counter. Advanced every tick; not on the wire.
    /// Hook point for future per-tick snapshot/sync logic.
    pub fn frame_num(&self) -> i64 {
        self.frame_num.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::client::OUTBOUND_QUEUE_CAPACITY;

    async fn wait_for_count(handle: &HubHandle, expected: usize) {
        for _ in 0..100 {
            if handle.client_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "registry never reached {} clients (now {})",
            expected,
            handle.client_count().await
        );
    }

    async fn recv_soon(rx: &mut mpsc::Receiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for dispatch")
            .expect("queue closed")
    }

    #[tokio::test]
    async fn dispatch_reaches_every_client_including_publisher() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (alice, mut alice_rx) = ClientHandle::new("alice");
        let (bob, mut bob_rx) = ClientHandle::new("bob");
        handle.register(alice).await;
        handle.register(bob).await;
        wait_for_count(&handle, 2).await;

        handle
            .broadcast(r#"{"player_id":"alice","frame_num":1}"#.to_string())
            .await
            .unwrap();

        let to_bob = recv_soon(&mut bob_rx).await;
        let echo = recv_soon(&mut alice_rx).await;
        assert_eq!(to_bob, r#"{"player_id":"alice","frame_num":1}"#);
        assert_eq!(echo, to_bob);
    }

    #[tokio::test]
    async fn full_queue_evicts_the_slow_client_only() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (slow, _slow_rx) = ClientHandle::new("slow");
        let (fast, mut fast_rx) = ClientHandle::new("fast");
        handle.register(slow).await;
        handle.register(fast).await;
        wait_for_count(&handle, 2).await;

        // The slow receiver is held but never drained: the dispatch after
        // capacity hits a full queue and must evict exactly that client.
        for n in 0..=OUTBOUND_QUEUE_CAPACITY {
            handle.broadcast(format!("{{\"frame_num\":{}}}", n)).await.unwrap();
            // Keep the fast client drained so only the slow one backs up.
            let _ = recv_soon(&mut fast_rx).await;
        }
        wait_for_count(&handle, 1).await;

        // Subsequent dispatch still reaches the surviving client.
        handle.broadcast("{\"frame_num\":-1}".to_string()).await.unwrap();
        assert_eq!(recv_soon(&mut fast_rx).await, "{\"frame_num\":-1}");
    }

    #[tokio::test]
    async fn closed_receiver_is_evicted_on_next_dispatch() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (gone, gone_rx) = ClientHandle::new("gone");
        handle.register(gone).await;
        wait_for_count(&handle, 1).await;

        drop(gone_rx);
        handle.broadcast("{}".to_string()).await.unwrap();
        wait_for_count(&handle, 0).await;
    }

    #[tokio::test]
    async fn unregister_unknown_id_is_a_noop() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (alice, _alice_rx) = ClientHandle::new("alice");
        handle.register(alice).await;
        wait_for_count(&handle, 1).await;

        handle.unregister("nobody".to_string(), 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.client_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_id_keeps_exactly_one_entry() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (first, mut first_rx) = ClientHandle::new("alice");
        let first_seq = first.conn_seq();
        handle.register(first).await;
        wait_for_count(&handle, 1).await;

        let (second, mut second_rx) = ClientHandle::new("alice");
        handle.register(second).await;

        // The displaced connection's queue closes; the registry stays at one.
        assert!(tokio::time::timeout(Duration::from_secs(1), first_rx.recv())
            .await
            .expect("displaced queue never closed")
            .is_none());
        assert_eq!(handle.client_count().await, 1);

        // The displaced connection's teardown must not remove the newcomer.
        handle.unregister("alice".to_string(), first_seq).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.client_count().await, 1);

        handle.broadcast("{\"frame_num\":9}".to_string()).await.unwrap();
        assert_eq!(recv_soon(&mut second_rx).await, "{\"frame_num\":9}");
    }

    #[tokio::test]
    async fn frame_counter_advances_on_tick() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let before = handle.frame_num();
        tokio::time::sleep(TICK_INTERVAL * 4).await;
        assert!(handle.frame_num() > before);
    }
}
