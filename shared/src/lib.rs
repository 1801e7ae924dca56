//! Smart Light Shared Protocol Types
//!
//! This crate provides the wire message types, the JSON codec and the
//! channel state machine shared by the controller and the simulated light.

pub mod codec;
pub mod messages;
pub mod state_machine;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use messages::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Default cloud endpoints
pub mod endpoints {
    /// Firehose endpoint (receive-only device messages)
    pub const FIREHOSE_URL: &str = "wss://api.artik.cloud/v1.1/live";

    /// Device channel endpoint; `ack=true` makes the broker acknowledge every frame
    pub const DEVICE_CHANNEL_URL: &str = "wss://api.artik.cloud/v1.1/websocket?ack=true";

    /// OAuth2 authorization endpoint
    pub const AUTHORIZE_URL: &str = "https://accounts.artik.cloud/authorize";
}

/// Action names understood by the Smart Light
pub mod actions {
    pub const SET_ON: &str = "setOn";
    pub const SET_OFF: &str = "setOff";
}

/// Correlation id used for the controller's registration message
pub const REGISTER_CID: &str = "myRegisterMessage";

/// Acknowledgement status text the broker returns for a successful registration
pub const REGISTERED_STATUS: &str = "OK";

/// Format a token as an `Authorization` value
pub fn bearer(token: &str) -> String {
    format!("bearer {}", token)
}

/// Immutable device identity: device id plus device bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub token: String,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            token: token.into(),
        }
    }

    /// `Authorization` value for this device
    pub fn authorization(&self) -> String {
        bearer(&self.token)
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("token", &"<redacted>")
            .finish()
    }
}
