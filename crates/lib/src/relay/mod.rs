//! Frame relay: hub, per-connection pumps, and the HTTP + WebSocket server.
//!
//! Single port serves HTTP and WebSocket. Clients publish frame updates on
//! `/ws`; the hub echo-broadcasts every update to all registered clients,
//! the publisher included. No game logic runs server-side.

mod client;
mod hub;
pub mod protocol;
mod pump;
mod server;

pub use client::ClientHandle;
pub use hub::{Hub, HubHandle};
pub use protocol::{FrameMessage, ProtocolError};
pub use server::run_relay;
