//! JSON text-frame codec for the broker channels
//!
//! Every frame is a single JSON object. Inbound frames are classified as:
//! ```text
//! {"error": {...}}                  -> Inbound::Error
//! {"type": "ping", "ts": ...}       -> Inbound::Ping
//! {"type": "action", "data": ...}   -> Inbound::Action
//! {"sdid": ..., "data": ...}        -> Inbound::Message
//! {"data": {...}}                   -> Inbound::Ack
//! ```

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{Acknowledgement, ActionOut, BrokerError, MessageOut};

/// Maximum frame size (1 MB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Unrecognized frame: {0}")]
    Unrecognized(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Keep-alive from the broker
    Ping { ts: u64 },
    /// Device message
    Message(MessageOut),
    /// Action addressed to this device
    Action(ActionOut),
    /// Acknowledgement of a frame we sent
    Ack(Acknowledgement),
    /// Error reported by the broker
    Error(BrokerError),
}

/// Encode an outbound message into a text frame
pub fn encode<T: Serialize>(message: &T) -> Result<String, CodecError> {
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode an inbound text frame
pub fn decode(text: &str) -> Result<Inbound, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(text.len()));
    }

    let mut value: Value = serde_json::from_str(text)?;
    let obj = value.as_object_mut().ok_or(CodecError::NotAnObject)?;

    if let Some(error) = obj.remove("error") {
        return Ok(Inbound::Error(serde_json::from_value(error)?));
    }

    let kind = obj.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some("ping") => {
            let ts = obj.get("ts").and_then(Value::as_u64).unwrap_or(0);
            return Ok(Inbound::Ping { ts });
        }
        Some("action") => {
            return Ok(Inbound::Action(serde_json::from_value(value)?));
        }
        _ => {}
    }

    if obj.contains_key("sdid") && obj.contains_key("data") {
        return Ok(Inbound::Message(serde_json::from_value(value)?));
    }

    if let Some(data) = obj.remove("data") {
        return Ok(Inbound::Ack(serde_json::from_value(data)?));
    }

    Err(CodecError::Unrecognized(
        text.chars().take(120).collect(),
    ))
}
