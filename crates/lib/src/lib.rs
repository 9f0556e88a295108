//! Framerelay core library: configuration and the frame relay server
//! used by the CLI.

pub mod config;
pub mod relay;
