//! Cloneable handle to the session actor

use super::actor::{SessionActor, SessionCommand};
use super::{SessionConfig, SessionError, SessionStatus, SubmitError, Submission};
use crate::auth::{AccessToken, AuthError, AuthorizationRequest, OAuthConfig};
use crate::channel::{ChannelConnector, ChannelKind};
use crate::notify::{Notification, NotificationBus};
use smartlight_shared::actions;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Manages the telemetry and control channels of one device session
#[derive(Clone)]
pub struct SessionManager {
    cmd_tx: mpsc::Sender<SessionCommand>,
    bus: NotificationBus,
    oauth: OAuthConfig,
    device_id: String,
}

impl SessionManager {
    /// Create a new session manager and start the session actor
    pub fn new(config: SessionConfig, connector: Arc<dyn ChannelConnector>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let bus = NotificationBus::new(config.notification_capacity);

        let oauth = config.oauth.clone();
        let device_id = config.identity.device_id.clone();

        let actor = SessionActor::new(config, connector, bus.clone(), event_tx);
        tokio::spawn(async move {
            actor.run(cmd_rx, event_rx).await;
        });

        Self {
            cmd_tx,
            bus,
            oauth,
            device_id,
        }
    }

    /// Device this session acts for
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    /// Start a login attempt with the configured OAuth client
    pub fn authorization_request(&self) -> Result<AuthorizationRequest, AuthError> {
        AuthorizationRequest::new(&self.oauth)
    }

    /// Open the firehose. Completion is reported on the bus.
    pub async fn connect_telemetry(&self) -> Result<(), SessionError> {
        self.connect(ChannelKind::Telemetry).await
    }

    pub async fn disconnect_telemetry(&self) -> Result<(), SessionError> {
        self.disconnect(ChannelKind::Telemetry).await
    }

    /// Open the device channel; the device registers as soon as it opens
    pub async fn connect_control(&self) -> Result<(), SessionError> {
        self.connect(ChannelKind::Control).await
    }

    pub async fn disconnect_control(&self) -> Result<(), SessionError> {
        self.disconnect(ChannelKind::Control).await
    }

    /// Submit a named action for the device
    pub async fn send_action(&self, name: &str) -> Result<Submission, SubmitError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::SendAction {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| SubmitError::SessionClosed)?;
        rx.await.map_err(|_| SubmitError::SessionClosed)?
    }

    pub async fn turn_on(&self) -> Result<Submission, SubmitError> {
        self.send_action(actions::SET_ON).await
    }

    pub async fn turn_off(&self) -> Result<Submission, SubmitError> {
        self.send_action(actions::SET_OFF).await
    }

    /// Use a user token from the login flow on the next telemetry connect
    pub async fn set_access_token(&self, token: AccessToken) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SetAccessToken { token, reply })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(|reply| SessionCommand::Status { reply }).await
    }

    /// Close both channels and stop the actor
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    async fn connect(&self, kind: ChannelKind) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Connect { kind, reply })
            .await?
    }

    async fn disconnect(&self, kind: ChannelKind) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { kind, reply })
            .await
    }

    /// Send a command and wait for its reply
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }
}
