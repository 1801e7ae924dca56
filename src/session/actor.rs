//! Session actor: sole owner of both channel links

use super::{
    ReconnectPolicy, SessionConfig, SessionError, SessionStatus, SubmitError, Submission,
};
use crate::auth::AccessToken;
use crate::channel::{ChannelConnector, ChannelEvent, ChannelKind, Link, LinkEvent, LinkSendError};
use crate::notify::{Notification, NotificationBus};
use smartlight_shared::state_machine::{ChannelStateMachine, ChannelState, ChannelTransition};
use smartlight_shared::{bearer, codec, now_ms, ActionIn, RegisterMessage, REGISTER_CID};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use url::Url;

/// Close code used when the client disconnects
const NORMAL_CLOSURE: u16 = 1000;

/// Requests sent from [`super::SessionManager`] to the actor
pub(super) enum SessionCommand {
    Connect {
        kind: ChannelKind,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        kind: ChannelKind,
        reply: oneshot::Sender<()>,
    },
    SendAction {
        name: String,
        reply: oneshot::Sender<Result<Submission, SubmitError>>,
    },
    SetAccessToken {
        token: AccessToken,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// One channel: its state machine and its current link, if any
struct ChannelSlot {
    kind: ChannelKind,
    fsm: ChannelStateMachine,
    link: Option<Link>,
}

impl ChannelSlot {
    fn new(kind: ChannelKind) -> Self {
        let fsm = match kind {
            ChannelKind::Telemetry => ChannelStateMachine::receive_only(),
            ChannelKind::Control => ChannelStateMachine::with_registration(),
        };
        Self {
            kind,
            fsm,
            link: None,
        }
    }

    fn state(&self) -> ChannelState {
        self.fsm.state()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.generation() == generation)
    }

    fn transition(&mut self, event: ChannelTransition) {
        if let Err(e) = self.fsm.process_event(event) {
            warn!("[{}] {}", self.kind, e);
        }
    }

    /// Close the link (if any) and forget it
    fn release(&mut self) -> bool {
        match self.link.take() {
            Some(link) => {
                link.close();
                true
            }
            None => false,
        }
    }
}

pub(super) struct SessionActor {
    config: SessionConfig,
    connector: Arc<dyn ChannelConnector>,
    bus: NotificationBus,
    event_tx: mpsc::Sender<LinkEvent>,
    telemetry: ChannelSlot,
    control: ChannelSlot,
    next_generation: u64,
    access_token: Option<AccessToken>,
}

impl SessionActor {
    pub(super) fn new(
        config: SessionConfig,
        connector: Arc<dyn ChannelConnector>,
        bus: NotificationBus,
        event_tx: mpsc::Sender<LinkEvent>,
    ) -> Self {
        Self {
            config,
            connector,
            bus,
            event_tx,
            telemetry: ChannelSlot::new(ChannelKind::Telemetry),
            control: ChannelSlot::new(ChannelKind::Control),
            next_generation: 0,
            access_token: None,
        }
    }

    /// Main actor loop
    pub(super) async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut event_rx: mpsc::Receiver<LinkEvent>,
    ) {
        info!("Session started for device {}", self.config.identity.device_id);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd) {
                                break;
                            }
                        }
                        // Every handle is gone
                        None => break,
                    }
                }

                Some(event) = event_rx.recv() => {
                    self.handle_link_event(event);
                }
            }
        }

        self.telemetry.release();
        self.control.release();
        info!("Session stopped");
    }

    /// Returns false when the actor should stop
    fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Connect { kind, reply } => {
                let _ = reply.send(self.connect(kind));
            }
            SessionCommand::Disconnect { kind, reply } => {
                self.disconnect(kind);
                let _ = reply.send(());
            }
            SessionCommand::SendAction { name, reply } => {
                let _ = reply.send(self.send_action(&name));
            }
            SessionCommand::SetAccessToken { token, reply } => {
                if token.is_expired_at(now_ms()) {
                    warn!("Storing an access token that has already expired");
                }
                self.access_token = Some(token);
                let _ = reply.send(());
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(SessionStatus {
                    telemetry: self.telemetry.state(),
                    control: self.control.state(),
                });
            }
            SessionCommand::Shutdown { reply } => {
                self.disconnect(ChannelKind::Telemetry);
                self.disconnect(ChannelKind::Control);
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn slot(&self, kind: ChannelKind) -> &ChannelSlot {
        match kind {
            ChannelKind::Telemetry => &self.telemetry,
            ChannelKind::Control => &self.control,
        }
    }

    fn slot_mut(&mut self, kind: ChannelKind) -> &mut ChannelSlot {
        match kind {
            ChannelKind::Telemetry => &mut self.telemetry,
            ChannelKind::Control => &mut self.control,
        }
    }

    /// Build the URL for a channel
    fn endpoint(&self, kind: ChannelKind) -> Result<String, SessionError> {
        let invalid = |e: url::ParseError| SessionError::InvalidEndpoint {
            kind,
            reason: e.to_string(),
        };

        match kind {
            ChannelKind::Telemetry => {
                // A valid user token from the login flow takes precedence over the device token
                let token = match &self.access_token {
                    Some(token) if !token.is_expired_at(now_ms()) => token.secret(),
                    _ => self.config.identity.token.as_str(),
                };
                let mut url = Url::parse(&self.config.firehose_url).map_err(invalid)?;
                url.query_pairs_mut()
                    .append_pair("sdid", &self.config.identity.device_id)
                    .append_pair("Authorization", &bearer(token));
                Ok(url.to_string())
            }
            ChannelKind::Control => {
                let mut url = Url::parse(&self.config.control_url).map_err(invalid)?;
                // Registration is confirmed through acks, so they must be on
                if !url.query_pairs().any(|(key, _)| key == "ack") {
                    url.query_pairs_mut().append_pair("ack", "true");
                }
                Ok(url.to_string())
            }
        }
    }

    fn connect(&mut self, kind: ChannelKind) -> Result<(), SessionError> {
        let url = self.endpoint(kind)?;

        if self.slot(kind).state().is_live() {
            match self.config.reconnect_policy {
                ReconnectPolicy::Reject => {
                    warn!("[{}] Connect requested while already connected", kind);
                    return Err(SessionError::AlreadyConnected(kind));
                }
                ReconnectPolicy::Replace => {
                    info!("[{}] Replacing live link", kind);
                    let slot = self.slot_mut(kind);
                    slot.release();
                    slot.transition(ChannelTransition::Disconnect);
                }
            }
        }

        self.next_generation += 1;
        let link = Link::spawn(
            kind,
            self.next_generation,
            url,
            self.connector.clone(),
            self.event_tx.clone(),
            self.config.outbound_capacity,
        );

        let slot = self.slot_mut(kind);
        slot.link = Some(link);
        slot.transition(ChannelTransition::Connect);
        Ok(())
    }

    fn disconnect(&mut self, kind: ChannelKind) {
        let slot = self.slot_mut(kind);
        let had_link = slot.release();
        slot.transition(ChannelTransition::Disconnect);

        if had_link {
            info!("[{}] Disconnected by client", kind);
            self.bus.publish(Notification::closed(
                kind,
                close_reason(kind, NORMAL_CLOSURE, "closed by client"),
            ));
        } else {
            debug!("[{}] Disconnect ignored: not connected", kind);
        }
    }

    fn send_action(&mut self, name: &str) -> Result<Submission, SubmitError> {
        if name.trim().is_empty() {
            return Err(SubmitError::EmptyAction);
        }

        let link = match (&self.control.link, self.control.state()) {
            (Some(link), ChannelState::Registered) => link,
            (Some(_), _) => return Err(SubmitError::NotRegistered),
            (None, _) => return Err(SubmitError::NotConnected),
        };

        let ts = now_ms();
        let request = ActionIn::single(name, self.config.identity.device_id.as_str(), ts);
        let text = codec::encode(&request).map_err(|e| {
            error!("Failed to encode action {}: {}", name, e);
            SubmitError::Serialization(e.to_string())
        })?;

        link.try_send(text).map_err(|e| match e {
            LinkSendError::Full => SubmitError::QueueFull,
            LinkSendError::Closed => SubmitError::NotConnected,
        })?;

        info!("Submitted action {} to {}", name, self.config.identity.device_id);
        Ok(Submission {
            cid: name.to_string(),
            ts,
        })
    }

    /// Send the registration message on a freshly opened control channel
    fn register(&self) {
        let identity = &self.config.identity;
        let message = RegisterMessage::new(REGISTER_CID, identity.device_id.as_str(), &identity.token);

        let result = match codec::encode(&message) {
            Ok(text) => match &self.control.link {
                Some(link) => link.try_send(text).map_err(|e| format!("{:?}", e)),
                None => Err("no link".to_string()),
            },
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => info!("Registering device {}", identity.device_id),
            Err(reason) => {
                error!("Failed to send registration: {}", reason);
                self.bus.publish(Notification::ControlError {
                    reason: format!("registration not sent: {}", reason),
                });
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        let LinkEvent {
            kind,
            generation,
            event,
        } = event;

        if !self.slot(kind).is_current(generation) {
            debug!("[{}#{}] Dropping event from stale link", kind, generation);
            return;
        }

        match event {
            ChannelEvent::Opened => {
                self.slot_mut(kind).transition(ChannelTransition::Opened);
                self.bus.publish(Notification::connected(kind));
                if kind == ChannelKind::Control {
                    self.register();
                }
            }
            ChannelEvent::Message { raw, message } => match kind {
                ChannelKind::Telemetry => self.bus.publish(Notification::TelemetryData {
                    device_id: message.sdid,
                    payload: message.data,
                    timestamp: message.ts,
                }),
                ChannelKind::Control => {
                    self.bus.publish(Notification::ControlMessage { text: raw });
                }
            },
            ChannelEvent::Acknowledged { raw, ack } => match kind {
                ChannelKind::Telemetry => debug!("[telemetry] Ignoring ack: {}", raw),
                ChannelKind::Control => {
                    if ack.is_registered() {
                        info!("Device {} registered", self.config.identity.device_id);
                        self.control.transition(ChannelTransition::Registered);
                        self.bus.publish(Notification::ControlRegistered);
                    } else {
                        self.bus.publish(Notification::ControlAck { text: raw });
                    }
                }
            },
            ChannelEvent::Closed { code, reason } => {
                warn!("[{}] Channel closed: code={} reason={}", kind, code, reason);
                let slot = self.slot_mut(kind);
                slot.link = None;
                slot.transition(ChannelTransition::Closed);
                self.bus
                    .publish(Notification::closed(kind, close_reason(kind, code, &reason)));
            }
            ChannelEvent::Errored { message, terminal } => {
                if terminal {
                    error!("[{}] Channel failed: {}", kind, message);
                    let slot = self.slot_mut(kind);
                    slot.link = None;
                    slot.transition(ChannelTransition::Failed);
                } else {
                    warn!("[{}] Broker error: {}", kind, message);
                }
                self.bus.publish(Notification::error(
                    kind,
                    format!("{} channel error: {}", kind, message),
                ));
            }
        }
    }
}

fn close_reason(kind: ChannelKind, code: u16, reason: &str) -> String {
    format!("{} channel closed. code: {}; reason: {}", kind, code, reason)
}
