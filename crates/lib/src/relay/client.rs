//! Per-connection client state: identity plus the bounded outbound queue.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::relay::protocol;

/// Outbound queue depth per client. Dispatch evicts the client when it is full.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

static NEXT_CONN_SEQ: AtomicU64 = AtomicU64::new(1);

/// A registered client: id, connection serial, and the sender half of its
/// outbound queue. Dropping the handle closes the queue, which is the stop
/// signal for the client's writer pump.
pub struct ClientHandle {
    id: String,
    conn_seq: u64,
    connected_at: i64,
    outbound_tx: mpsc::Sender<String>,
}

impl ClientHandle {
    /// Create a handle and the receiver its writer pump will drain.
    pub fn new(id: impl Into<String>) -> (Self, mpsc::Receiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = Self {
            id: id.into(),
            conn_seq: NEXT_CONN_SEQ.fetch_add(1, Ordering::Relaxed),
            connected_at: protocol::now_nanos(),
            outbound_tx,
        };
        (handle, outbound_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serial distinguishing this connection from earlier ones under the same id.
    pub fn conn_seq(&self) -> u64 {
        self.conn_seq
    }

    /// Receipt-clock nanoseconds at handshake completion.
    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    /// Non-blocking enqueue used by dispatch; the hub evicts on failure.
    pub fn try_send(&self, message: String) -> Result<(), TrySendError<String>> {
        self.outbound_tx.try_send(message)
    }
}
