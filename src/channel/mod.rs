//! Broker channel plumbing
//!
//! This module handles:
//! - The connector/sink/source traits the session opens channels through
//! - The WebSocket backend used against the real broker
//! - Link tasks that own a live connection and emit typed channel events

mod link;
pub mod traits;
mod websocket;

#[cfg(test)]
pub mod memory;

pub use link::{ChannelEvent, ChannelKind, Link, LinkEvent, LinkSendError};
pub use traits::ChannelConnector;
pub use websocket::WebSocketConnector;
