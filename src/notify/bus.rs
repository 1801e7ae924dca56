use super::topics;
use crate::channel::ChannelKind;
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

/// Notifications published by the session
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    TelemetryConnected,
    /// Device message relayed unchanged from the firehose
    TelemetryData {
        device_id: String,
        payload: Value,
        /// `ts` as the broker sent it, if it sent one
        timestamp: Option<Value>,
    },
    TelemetryClosed { reason: String },
    TelemetryError { reason: String },
    ControlConnected,
    ControlRegistered,
    /// Non-registration acknowledgement, raw frame text
    ControlAck { text: String },
    /// Message received on the control channel, raw frame text
    ControlMessage { text: String },
    ControlClosed { reason: String },
    ControlError { reason: String },
}

impl Notification {
    pub fn connected(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Telemetry => Self::TelemetryConnected,
            ChannelKind::Control => Self::ControlConnected,
        }
    }

    pub fn closed(kind: ChannelKind, reason: String) -> Self {
        match kind {
            ChannelKind::Telemetry => Self::TelemetryClosed { reason },
            ChannelKind::Control => Self::ControlClosed { reason },
        }
    }

    pub fn error(kind: ChannelKind, reason: String) -> Self {
        match kind {
            ChannelKind::Telemetry => Self::TelemetryError { reason },
            ChannelKind::Control => Self::ControlError { reason },
        }
    }

    /// Topic name of this notification
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TelemetryConnected => topics::TELEMETRY_CONNECTED,
            Self::TelemetryData { .. } => topics::TELEMETRY_DATA,
            Self::TelemetryClosed { .. } => topics::TELEMETRY_CLOSED,
            Self::TelemetryError { .. } => topics::TELEMETRY_ERROR,
            Self::ControlConnected => topics::CONTROL_CONNECTED,
            Self::ControlRegistered => topics::CONTROL_REGISTERED,
            Self::ControlAck { .. } => topics::CONTROL_ACK,
            Self::ControlMessage { .. } => topics::CONTROL_MESSAGE,
            Self::ControlClosed { .. } => topics::CONTROL_CLOSED,
            Self::ControlError { .. } => topics::CONTROL_ERROR,
        }
    }

    /// Channel this notification originates from
    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::TelemetryConnected
            | Self::TelemetryData { .. }
            | Self::TelemetryClosed { .. }
            | Self::TelemetryError { .. } => ChannelKind::Telemetry,
            _ => ChannelKind::Control,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TelemetryData {
                device_id,
                payload,
                timestamp,
            } => write!(
                f,
                "{} sdid={} ts={} data={}",
                self.topic(),
                device_id,
                timestamp_text(timestamp.as_ref()).unwrap_or_else(|| "-".into()),
                payload
            ),
            Self::TelemetryClosed { reason }
            | Self::TelemetryError { reason }
            | Self::ControlClosed { reason }
            | Self::ControlError { reason } => write!(f, "{} {}", self.topic(), reason),
            Self::ControlAck { text } | Self::ControlMessage { text } => {
                write!(f, "{} {}", self.topic(), text)
            }
            _ => f.write_str(self.topic()),
        }
    }
}

/// Relayed timestamp as text; strings are shown without quotes
pub fn timestamp_text(ts: Option<&Value>) -> Option<String> {
    match ts? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Broadcast bus shared by the session and its observers
#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Create a bus; `capacity` bounds how far a subscriber may lag
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current subscriber
    pub fn publish(&self, notification: Notification) {
        debug!("notify: {}", notification);
        // No subscribers is fine; nobody is watching yet
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}
