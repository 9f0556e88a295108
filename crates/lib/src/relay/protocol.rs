//! Relay wire protocol: the frame envelope exchanged with clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decode/encode failure for a single relayed frame. Never fatal to a
/// connection; the offending frame is dropped and the pump keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("frame encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One frame update: `{ "player_id", "frame_num", "timestamp", "actions" }`.
///
/// `timestamp` is assigned by the relay at receipt; whatever the sender put
/// there is discarded. `actions` is carried opaque: the relay never looks
/// inside, and key order survives the round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMessage {
    pub player_id: String,
    #[serde(default)]
    pub frame_num: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub actions: Map<String, Value>,
}

impl FrameMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Overwrite the timestamp with the current receipt time.
    pub fn stamp(&mut self) {
        self.timestamp = now_nanos();
    }
}

/// Nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
