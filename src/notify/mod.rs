//! Process-local notification bus
//!
//! The session republishes every channel event as a [`Notification`]; any
//! number of observers subscribe and each receives every notification in
//! emission order.

mod bus;

pub use bus::{timestamp_text, Notification, NotificationBus};

/// Notification topic names
pub mod topics {
    pub const TELEMETRY_CONNECTED: &str = "telemetry-connected";
    pub const TELEMETRY_DATA: &str = "telemetry-data";
    pub const TELEMETRY_CLOSED: &str = "telemetry-closed";
    pub const TELEMETRY_ERROR: &str = "telemetry-error";
    pub const CONTROL_CONNECTED: &str = "control-connected";
    pub const CONTROL_REGISTERED: &str = "control-registered";
    pub const CONTROL_ACK: &str = "control-ack";
    pub const CONTROL_MESSAGE: &str = "control-message";
    pub const CONTROL_CLOSED: &str = "control-closed";
    pub const CONTROL_ERROR: &str = "control-error";
}
