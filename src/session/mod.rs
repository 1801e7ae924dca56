//! Dual-channel session management
//!
//! This module handles:
//! - Opening and closing the telemetry and control channels
//! - Registering the device as soon as the control channel opens
//! - Relaying channel events to the notification bus
//! - Validating and submitting action requests
//!
//! All state lives in one actor task; [`SessionManager`] is a cloneable
//! handle that talks to it by message passing.

mod actor;
mod manager;

pub use manager::SessionManager;

use crate::auth::OAuthConfig;
use crate::channel::ChannelKind;
use serde::Deserialize;
use smartlight_shared::state_machine::ChannelState;
use smartlight_shared::{endpoints, DeviceIdentity};
use thiserror::Error;

/// What `connect_*` does when the channel already has a live link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Refuse with [`SessionError::AlreadyConnected`]
    #[default]
    Reject,
    /// Close the live link and open a new one
    Replace,
}

/// Default queue depths
pub const DEFAULT_COMMAND_CAPACITY: usize = 32;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

/// Configuration for the session manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device identity used for registration and actions
    pub identity: DeviceIdentity,
    /// Firehose endpoint
    pub firehose_url: String,
    /// Device channel endpoint
    pub control_url: String,
    /// Login settings
    pub oauth: OAuthConfig,
    /// Pending session commands
    pub command_capacity: usize,
    /// Pending channel events
    pub event_capacity: usize,
    /// How far an observer may lag before it misses notifications
    pub notification_capacity: usize,
    /// Pending outbound frames per link
    pub outbound_capacity: usize,
    pub reconnect_policy: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            firehose_url: endpoints::FIREHOSE_URL.into(),
            control_url: endpoints::DEVICE_CHANNEL_URL.into(),
            oauth: OAuthConfig::default(),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

/// Errors from connect/disconnect requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{0} channel is already connected")]
    AlreadyConnected(ChannelKind),

    #[error("invalid {kind} endpoint: {reason}")]
    InvalidEndpoint { kind: ChannelKind, reason: String },

    #[error("session is shut down")]
    SessionClosed,
}

/// Why an action was not submitted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("action name is empty")]
    EmptyAction,

    #[error("control channel is not connected")]
    NotConnected,

    #[error("control channel is not registered yet")]
    NotRegistered,

    #[error("failed to serialize action: {0}")]
    Serialization(String),

    #[error("control channel outbound queue is full")]
    QueueFull,

    #[error("session is shut down")]
    SessionClosed,
}

/// An action accepted for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Correlation id (the action name)
    pub cid: String,
    /// Timestamp carried in the request
    pub ts: u64,
}

/// Snapshot of both channel states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub telemetry: ChannelState,
    pub control: ChannelState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessToken;
    use crate::channel::memory::{MemoryConnector, MemoryRemote};
    use crate::channel::traits::Frame;
    use crate::notify::Notification;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(200);

    struct Harness {
        session: SessionManager,
        connector: Arc<MemoryConnector>,
        remotes: mpsc::UnboundedReceiver<MemoryRemote>,
        events: broadcast::Receiver<Notification>,
    }

    fn config(policy: ReconnectPolicy) -> SessionConfig {
        let mut config = SessionConfig::new(DeviceIdentity::new("dev-1", "tok"));
        config.firehose_url = "ws://broker.test/v1.1/live".into();
        config.control_url = "ws://broker.test/v1.1/websocket".into();
        config.reconnect_policy = policy;
        config
    }

    fn harness_with(policy: ReconnectPolicy) -> Harness {
        let (connector, remotes) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let session = SessionManager::new(config(policy), connector.clone());
        let events = session.subscribe();
        Harness {
            session,
            connector,
            remotes,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(ReconnectPolicy::Reject)
    }

    impl Harness {
        async fn next(&mut self) -> Notification {
            timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for a notification")
                .expect("bus closed")
        }

        async fn remote(&mut self) -> MemoryRemote {
            timeout(WAIT, self.remotes.recv())
                .await
                .expect("timed out waiting for a connection")
                .expect("connector dropped")
        }

        /// Round-trip through the actor, then check nothing was published
        async fn assert_quiet(&mut self) {
            self.session.status().await.unwrap();
            assert!(matches!(
                self.events.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            ));
        }

        async fn open_telemetry(&mut self) -> MemoryRemote {
            self.session.connect_telemetry().await.unwrap();
            let remote = self.remote().await;
            assert_eq!(self.next().await, Notification::TelemetryConnected);
            remote
        }

        /// Open the control channel and complete registration
        async fn open_control(&mut self) -> MemoryRemote {
            self.session.connect_control().await.unwrap();
            let mut remote = self.remote().await;
            assert_eq!(self.next().await, Notification::ControlConnected);
            let _register = sent_json(&mut remote).await;
            remote.send_text(r#"{"data":{"message":"OK","code":"200","cid":"myRegisterMessage"}}"#);
            assert_eq!(self.next().await, Notification::ControlRegistered);
            remote
        }
    }

    async fn sent_json(remote: &mut MemoryRemote) -> Value {
        match timeout(WAIT, remote.next_sent()).await {
            Ok(Some(Frame::Text(text))) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    /// Wait a little for a client frame and fail if one arrives
    async fn assert_nothing_sent(remote: &mut MemoryRemote) {
        if let Ok(frame) = timeout(QUIET, remote.next_sent()).await {
            panic!("unexpected frame {:?}", frame);
        }
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_silent() {
        let mut h = harness();
        h.session.disconnect_telemetry().await.unwrap();
        h.session.disconnect_control().await.unwrap();
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_send_action_without_control_channel() {
        let mut h = harness();
        assert_eq!(h.session.turn_on().await, Err(SubmitError::NotConnected));
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_empty_action_is_rejected() {
        let mut h = harness();
        let _remote = h.open_control().await;
        assert_eq!(h.session.send_action("  ").await, Err(SubmitError::EmptyAction));
    }

    #[tokio::test]
    async fn test_telemetry_connect_publishes_once() {
        let mut h = harness();
        let remote = h.open_telemetry().await;

        assert!(remote.url.starts_with("ws://broker.test/v1.1/live?"));
        assert!(remote.url.contains("sdid=dev-1"));
        assert!(remote.url.contains("Authorization=bearer+tok"));

        let status = h.session.status().await.unwrap();
        assert_eq!(status.telemetry, ChannelState::Open);
        assert_eq!(status.control, ChannelState::Disconnected);
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_user_token_authorizes_telemetry() {
        let mut h = harness();
        h.session
            .set_access_token(AccessToken::new("user-tok", "bearer", Some(3600)))
            .await
            .unwrap();
        let remote = h.open_telemetry().await;
        assert!(remote.url.contains("Authorization=bearer+user-tok"));
    }

    #[tokio::test]
    async fn test_expired_user_token_falls_back_to_device_token() {
        let mut h = harness();
        h.session
            .set_access_token(AccessToken::new("user-tok", "bearer", Some(0)))
            .await
            .unwrap();
        let remote = h.open_telemetry().await;
        assert!(remote.url.contains("Authorization=bearer+tok"));
    }

    #[tokio::test]
    async fn test_telemetry_data_is_relayed_unchanged() {
        let mut h = harness();
        let remote = h.open_telemetry().await;

        remote.send_text(
            r#"{"mid":"m1","sdid":"dev-1","ts":1500,"cts":1499,"data":{"state":1,"extra":[1,2,{"x":null}]}}"#,
        );

        assert_eq!(
            h.next().await,
            Notification::TelemetryData {
                device_id: "dev-1".into(),
                payload: json!({ "state": 1, "extra": [1, 2, { "x": null }] }),
                timestamp: Some(json!(1500)),
            }
        );
    }

    #[tokio::test]
    async fn test_pings_and_garbage_are_not_published() {
        let mut h = harness();
        let remote = h.open_telemetry().await;

        remote.send_text(r#"{"type":"ping","ts":1}"#);
        remote.send_text("not json");
        remote.send_text(r#"{"sdid":"dev-1","ts":2,"data":{"state":0}}"#);

        assert!(matches!(
            h.next().await,
            Notification::TelemetryData { timestamp: Some(ts), .. } if ts == json!(2)
        ));
    }

    #[tokio::test]
    async fn test_telemetry_timestamp_is_relayed_as_sent() {
        let mut h = harness();
        let remote = h.open_telemetry().await;

        remote.send_text(r#"{"sdid":"dev-1","ts":1500.0,"data":{"n":1}}"#);
        remote.send_text(r#"{"sdid":"dev-1","data":{"n":2}}"#);
        remote.send_text(r#"{"sdid":"dev-1","ts":"1500","data":{"n":3}}"#);
        remote.send_text(r#"{"sdid":"dev-1","ts":9,"data":{"n":4}}"#);

        let expected = [
            (json!({ "n": 1 }), Some(json!(1500.0))),
            (json!({ "n": 2 }), None),
            (json!({ "n": 3 }), Some(json!("1500"))),
            (json!({ "n": 4 }), Some(json!(9))),
        ];
        for (payload, timestamp) in expected {
            assert_eq!(
                h.next().await,
                Notification::TelemetryData {
                    device_id: "dev-1".into(),
                    payload,
                    timestamp,
                }
            );
        }
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_control_registers_on_open() {
        let mut h = harness();
        h.session.connect_control().await.unwrap();
        let mut remote = h.remote().await;

        assert_eq!(remote.url, "ws://broker.test/v1.1/websocket?ack=true");
        assert_eq!(h.next().await, Notification::ControlConnected);

        let register = sent_json(&mut remote).await;
        assert_eq!(register["type"], "register");
        assert_eq!(register["sdid"], "dev-1");
        assert_eq!(register["Authorization"], "bearer tok");
        assert_eq!(register["cid"], "myRegisterMessage");

        // Exactly one registration
        assert_nothing_sent(&mut remote).await;
        assert_eq!(h.session.status().await.unwrap().control, ChannelState::Open);
    }

    #[tokio::test]
    async fn test_configured_ack_flag_is_kept() {
        let (connector, mut remotes) = MemoryConnector::new();
        let mut config = config(ReconnectPolicy::Reject);
        config.control_url = "ws://broker.test/v1.1/websocket?ack=false".into();
        let session = SessionManager::new(config, Arc::new(connector));

        session.connect_control().await.unwrap();
        let remote = timeout(WAIT, remotes.recv()).await.unwrap().unwrap();
        assert_eq!(remote.url, "ws://broker.test/v1.1/websocket?ack=false");
    }

    #[tokio::test]
    async fn test_action_requires_registration() {
        let mut h = harness();
        h.session.connect_control().await.unwrap();
        let mut remote = h.remote().await;
        assert_eq!(h.next().await, Notification::ControlConnected);
        let _register = sent_json(&mut remote).await;

        assert_eq!(h.session.turn_off().await, Err(SubmitError::NotRegistered));
        assert_nothing_sent(&mut remote).await;
    }

    #[tokio::test]
    async fn test_action_wire_shape() {
        let mut h = harness();
        let mut remote = h.open_control().await;

        let submission = h.session.turn_on().await.unwrap();
        assert_eq!(submission.cid, "setOn");

        let action = sent_json(&mut remote).await;
        assert_eq!(action["type"], "action");
        assert_eq!(action["cid"], "setOn");
        assert_eq!(action["ddid"], "dev-1");
        assert_eq!(action["ts"], submission.ts);
        assert_eq!(action["data"]["actions"][0]["name"], "setOn");
        assert_eq!(action["data"]["actions"][0]["parameter"], json!({}));
    }

    #[tokio::test]
    async fn test_non_registration_ack_is_published_verbatim() {
        let mut h = harness();
        let remote = h.open_control().await;

        let frame = r#"{"data":{"mid":"abc","cid":"setOn"}}"#;
        remote.send_text(frame);
        assert_eq!(h.next().await, Notification::ControlAck { text: frame.into() });

        // Status text other than exactly "OK" is not a registration
        let frame = r#"{"data":{"message":"ok","cid":"x"}}"#;
        remote.send_text(frame);
        assert_eq!(h.next().await, Notification::ControlAck { text: frame.into() });
    }

    #[tokio::test]
    async fn test_control_message_is_published_verbatim() {
        let mut h = harness();
        let remote = h.open_control().await;

        let frame = r#"{"sdid":"other","ts":3,"data":{"state":0}}"#;
        remote.send_text(frame);
        assert_eq!(
            h.next().await,
            Notification::ControlMessage { text: frame.into() }
        );
    }

    #[tokio::test]
    async fn test_broker_error_keeps_channel_open() {
        let mut h = harness();
        let remote = h.open_control().await;

        remote.send_text(r#"{"error":{"code":400,"message":"bad request","cid":"setOn"}}"#);
        assert_eq!(
            h.next().await,
            Notification::ControlError {
                reason: "control channel error: bad request".into()
            }
        );
        assert_eq!(
            h.session.status().await.unwrap().control,
            ChannelState::Registered
        );
        assert!(h.session.turn_off().await.is_ok());
    }

    #[tokio::test]
    async fn test_remote_close_publishes_reason() {
        let mut h = harness();
        let remote = h.open_telemetry().await;

        remote.close(4001, "token expired");
        assert_eq!(
            h.next().await,
            Notification::TelemetryClosed {
                reason: "telemetry channel closed. code: 4001; reason: token expired".into()
            }
        );
        assert_eq!(
            h.session.status().await.unwrap().telemetry,
            ChannelState::Closed
        );

        // A closed channel can be reopened
        let _again = h.open_telemetry().await;
    }

    #[tokio::test]
    async fn test_dropped_connection_is_abnormal_close() {
        let mut h = harness();
        let remote = h.open_control().await;
        drop(remote);

        assert_eq!(
            h.next().await,
            Notification::ControlClosed {
                reason: "control channel closed. code: 1006; reason: connection dropped".into()
            }
        );
        assert_eq!(h.session.turn_on().await, Err(SubmitError::NotConnected));
    }

    #[tokio::test]
    async fn test_client_disconnect() {
        let mut h = harness();
        let mut remote = h.open_telemetry().await;

        h.session.disconnect_telemetry().await.unwrap();
        assert_eq!(
            h.next().await,
            Notification::TelemetryClosed {
                reason: "telemetry channel closed. code: 1000; reason: closed by client".into()
            }
        );
        assert!(matches!(
            timeout(WAIT, remote.next_sent()).await,
            Ok(Some(Frame::Close { code: 1000, .. }))
        ));

        // Second disconnect has nothing to close
        h.session.disconnect_telemetry().await.unwrap();
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_connect_failure_publishes_error() {
        let mut h = harness();
        h.connector.refuse_connections(true);

        h.session.connect_telemetry().await.unwrap();
        assert_eq!(
            h.next().await,
            Notification::TelemetryError {
                reason: "telemetry channel error: connection refused".into()
            }
        );
        assert_eq!(
            h.session.status().await.unwrap().telemetry,
            ChannelState::Errored
        );

        h.connector.refuse_connections(false);
        let _remote = h.open_telemetry().await;
    }

    #[tokio::test]
    async fn test_reject_policy() {
        let mut h = harness();
        let _remote = h.open_telemetry().await;

        assert_eq!(
            h.session.connect_telemetry().await,
            Err(SessionError::AlreadyConnected(ChannelKind::Telemetry))
        );
        // The other channel is independent
        assert!(h.session.connect_control().await.is_ok());
    }

    #[tokio::test]
    async fn test_replace_policy_drops_stale_events() {
        let mut h = harness_with(ReconnectPolicy::Replace);
        let mut first = h.open_telemetry().await;
        let second = h.open_telemetry().await;

        assert!(matches!(
            timeout(WAIT, first.next_sent()).await,
            Ok(Some(Frame::Close { .. }))
        ));

        first.send_text(r#"{"sdid":"dev-1","ts":1,"data":{"from":"first"}}"#);
        first.close(1000, "");
        second.send_text(r#"{"sdid":"dev-1","ts":2,"data":{"from":"second"}}"#);

        assert_eq!(
            h.next().await,
            Notification::TelemetryData {
                device_id: "dev-1".into(),
                payload: json!({ "from": "second" }),
                timestamp: Some(json!(2)),
            }
        );
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let (connector, _remotes) = MemoryConnector::new();
        let mut config = config(ReconnectPolicy::Reject);
        config.firehose_url = "not a url".into();
        let session = SessionManager::new(config, Arc::new(connector));

        assert!(matches!(
            session.connect_telemetry().await,
            Err(SessionError::InvalidEndpoint {
                kind: ChannelKind::Telemetry,
                ..
            })
        ));
        assert_eq!(
            session.status().await.unwrap().telemetry,
            ChannelState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let mut h = harness();
        let _telemetry = h.open_telemetry().await;
        let _control = h.open_control().await;

        h.session.shutdown().await.unwrap();
        assert!(matches!(h.next().await, Notification::TelemetryClosed { .. }));
        assert!(matches!(h.next().await, Notification::ControlClosed { .. }));

        assert_eq!(h.session.turn_on().await, Err(SubmitError::SessionClosed));
        assert_eq!(h.session.status().await, Err(SessionError::SessionClosed));
    }

    #[tokio::test]
    async fn test_authorization_request_uses_session_oauth() {
        let h = harness();
        let request = h.session.authorization_request().unwrap();
        assert!(request.url().contains("response_type=token"));
        assert_eq!(h.session.device_id(), "dev-1");
    }
}
