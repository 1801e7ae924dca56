//! Broker wire messages
//!
//! Outbound frames (`RegisterMessage`, `ActionIn`, `MessageIn`) are built by
//! clients; inbound frames (`MessageOut`, `ActionOut`, `Acknowledgement`,
//! `BrokerError`) are produced by the broker and parsed in [`crate::codec`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Registration handshake, sent once right after a device channel opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdid: String,
    #[serde(rename = "Authorization")]
    pub authorization: String,
    pub cid: String,
}

impl RegisterMessage {
    pub fn new(cid: impl Into<String>, device_id: impl Into<String>, token: &str) -> Self {
        Self {
            kind: "register".into(),
            sdid: device_id.into(),
            authorization: crate::bearer(token),
            cid: cid.into(),
        }
    }
}

/// A single named action with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDetails {
    pub name: String,
    #[serde(rename = "parameter", alias = "parameters", default)]
    pub parameter: Map<String, Value>,
}

impl ActionDetails {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDetailsArray {
    pub actions: Vec<ActionDetails>,
}

/// Action request sent by a controller to a target device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionIn {
    #[serde(rename = "type")]
    pub kind: String,
    pub cid: String,
    pub ddid: String,
    pub ts: u64,
    pub data: ActionDetailsArray,
}

impl ActionIn {
    /// Build a request carrying one parameterless action; the action name doubles as `cid`
    pub fn single(name: &str, ddid: impl Into<String>, ts: u64) -> Self {
        Self {
            kind: "action".into(),
            cid: name.to_string(),
            ddid: ddid.into(),
            ts,
            data: ActionDetailsArray {
                actions: vec![ActionDetails::named(name)],
            },
        }
    }
}

/// Data message sent by a device (e.g. its new light state)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageIn {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdid: String,
    pub ts: u64,
    pub data: Value,
    pub cid: String,
}

impl MessageIn {
    pub fn new(sdid: impl Into<String>, ts: u64, data: Value, cid: impl Into<String>) -> Self {
        Self {
            kind: "message".into(),
            sdid: sdid.into(),
            ts,
            data,
            cid: cid.into(),
        }
    }
}

/// Device message delivered by the broker
///
/// Timestamps are kept exactly as sent; the broker does not always send
/// them as integers, and some frames carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageOut {
    pub sdid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Value>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Action delivered by the broker to its target device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOut {
    #[serde(default)]
    pub sdid: Option<String>,
    #[serde(default)]
    pub ddid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Value>,
    #[serde(default)]
    pub mid: Option<String>,
    pub data: ActionDetailsArray,
}

impl ActionOut {
    /// Name of the first action, if any
    pub fn first_action(&self) -> Option<&str> {
        self.data.actions.first().map(|a| a.name.as_str())
    }
}

/// Acknowledgement body (the broker wraps it as `{"data": {...}}`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub mid: Option<String>,
}

impl Acknowledgement {
    /// True when the status text is exactly the registration status `"OK"`
    pub fn is_registered(&self) -> bool {
        self.message.as_deref() == Some(crate::REGISTERED_STATUS)
    }
}

/// Error body (the broker wraps it as `{"error": {...}}`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BrokerError {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub cid: Option<String>,
}
