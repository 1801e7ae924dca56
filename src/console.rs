//! Console observer: prints session notifications as status lines

use crate::channel::ChannelKind;
use crate::notify::{timestamp_text, Notification};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

const LIVE_HEADER: &str = "WebSocket /live:";
const WS_HEADER: &str = "WebSocket /websocket:";

/// Status line for a notification
pub fn render(notification: &Notification) -> String {
    let header = match notification.channel() {
        ChannelKind::Telemetry => LIVE_HEADER,
        ChannelKind::Control => WS_HEADER,
    };

    match notification {
        Notification::TelemetryData {
            device_id,
            payload,
            timestamp,
        } => match timestamp_text(timestamp.as_ref()) {
            Some(ts) => format!("Device {} status: {} (updated at {} ms)", device_id, payload, ts),
            None => format!("Device {} status: {}", device_id, payload),
        },
        Notification::TelemetryConnected | Notification::ControlConnected => {
            format!("{} connected", header)
        }
        Notification::ControlRegistered => format!("{} device registered", header),
        Notification::ControlAck { text } | Notification::ControlMessage { text } => {
            format!("{} received {}", header, text)
        }
        Notification::TelemetryClosed { reason }
        | Notification::TelemetryError { reason }
        | Notification::ControlClosed { reason }
        | Notification::ControlError { reason } => format!("{} {}", header, reason),
    }
}

/// Print every notification until the bus closes
pub async fn run_observer(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(notification) => println!("{}", render(&notification)),
            Err(RecvError::Lagged(missed)) => {
                warn!("Console fell behind, {} notifications skipped", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Console observer stopped");
}
