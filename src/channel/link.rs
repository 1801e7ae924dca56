//! Link task owning one live channel connection
//!
//! A link connects, reports `Opened`, then pumps frames in both directions
//! until the socket closes, fails, or the session asks it to stop. Every
//! event is tagged with the channel kind and the link generation so the
//! session can drop events from links it has already replaced.

use crate::channel::traits::{ChannelConnector, Frame};
use smartlight_shared::codec::{self, Inbound};
use smartlight_shared::{Acknowledgement, MessageOut};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Close code reported when the socket vanishes without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;

/// The two broker channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Receive-only firehose of device messages
    Telemetry,
    /// Bidirectional device channel (register, actions, acks)
    Control,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Telemetry => write!(f, "telemetry"),
            ChannelKind::Control => write!(f, "control"),
        }
    }
}

/// Events a link delivers to the session
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Socket opened
    Opened,
    /// Device message; `raw` is the frame text as received
    Message { raw: String, message: MessageOut },
    /// Acknowledgement; `raw` is the frame text as received
    Acknowledged { raw: String, ack: Acknowledgement },
    /// Socket closed
    Closed { code: u16, reason: String },
    /// Error; `terminal` errors end the link
    Errored { message: String, terminal: bool },
}

/// A tagged channel event
#[derive(Debug, Clone)]
pub struct LinkEvent {
    pub kind: ChannelKind,
    pub generation: u64,
    pub event: ChannelEvent,
}

enum LinkCommand {
    Send(String),
    Close,
}

/// Why a frame could not be queued on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSendError {
    /// Outbound queue is full
    Full,
    /// Link task has exited
    Closed,
}

/// Handle to a running link task
pub struct Link {
    generation: u64,
    cmd_tx: mpsc::Sender<LinkCommand>,
    task: JoinHandle<()>,
}

impl Link {
    /// Spawn a link task that connects to `url`
    pub fn spawn(
        kind: ChannelKind,
        generation: u64,
        url: String,
        connector: Arc<dyn ChannelConnector>,
        event_tx: mpsc::Sender<LinkEvent>,
        outbound_capacity: usize,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(outbound_capacity.max(1));
        let ctx = LinkContext {
            kind,
            generation,
            event_tx,
        };

        let task = tokio::spawn(async move {
            run_link(ctx, url, connector, cmd_rx).await;
        });

        Self {
            generation,
            cmd_tx,
            task,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a text frame without waiting
    pub fn try_send(&self, text: String) -> Result<(), LinkSendError> {
        self.cmd_tx
            .try_send(LinkCommand::Send(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => LinkSendError::Full,
                mpsc::error::TrySendError::Closed(_) => LinkSendError::Closed,
            })
    }

    /// Ask the link to close; does not wait for in-flight frames
    pub fn close(self) {
        if self.cmd_tx.try_send(LinkCommand::Close).is_err() {
            // Queue full or task gone: stop it outright
            self.task.abort();
        }
    }
}

struct LinkContext {
    kind: ChannelKind,
    generation: u64,
    event_tx: mpsc::Sender<LinkEvent>,
}

impl LinkContext {
    /// Deliver an event; returns false once the session is gone
    async fn emit(&self, event: ChannelEvent) -> bool {
        self.event_tx
            .send(LinkEvent {
                kind: self.kind,
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// Main link loop
async fn run_link(
    ctx: LinkContext,
    url: String,
    connector: Arc<dyn ChannelConnector>,
    mut cmd_rx: mpsc::Receiver<LinkCommand>,
) {
    debug!(
        "[{}#{}] Connecting via {}",
        ctx.kind,
        ctx.generation,
        connector.name()
    );

    let connected = tokio::select! {
        result = connector.connect(&url) => result,
        _ = wait_for_close(&mut cmd_rx) => {
            debug!("[{}#{}] Closed before open", ctx.kind, ctx.generation);
            return;
        }
    };

    let (mut sink, mut source) = match connected {
        Ok(halves) => halves,
        Err(e) => {
            warn!("[{}#{}] Connect failed: {:#}", ctx.kind, ctx.generation, e);
            ctx.emit(ChannelEvent::Errored {
                message: format!("{:#}", e),
                terminal: true,
            })
            .await;
            return;
        }
    };

    info!("[{}#{}] Channel open", ctx.kind, ctx.generation);
    if !ctx.emit(ChannelEvent::Opened).await {
        return;
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(LinkCommand::Send(text)) => {
                        trace!("[{}#{}] >> {}", ctx.kind, ctx.generation, text);
                        if let Err(e) = sink.send_text(text).await {
                            ctx.emit(ChannelEvent::Errored {
                                message: format!("send failed: {:#}", e),
                                terminal: true,
                            })
                            .await;
                            return;
                        }
                    }
                    Some(LinkCommand::Close) | None => {
                        if let Err(e) = sink.close().await {
                            debug!("[{}#{}] Close failed: {:#}", ctx.kind, ctx.generation, e);
                        }
                        debug!("[{}#{}] Closed by client", ctx.kind, ctx.generation);
                        return;
                    }
                }
            }

            frame = source.next_frame() => {
                match frame {
                    Some(Ok(Frame::Text(text))) => {
                        if let Some(event) = classify(&ctx, text) {
                            if !ctx.emit(event).await {
                                return;
                            }
                        }
                    }
                    Some(Ok(Frame::Close { code, reason })) => {
                        ctx.emit(ChannelEvent::Closed { code, reason }).await;
                        return;
                    }
                    Some(Err(e)) => {
                        ctx.emit(ChannelEvent::Errored {
                            message: format!("{:#}", e),
                            terminal: true,
                        })
                        .await;
                        return;
                    }
                    None => {
                        ctx.emit(ChannelEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "connection dropped".into(),
                        })
                        .await;
                        return;
                    }
                }
            }
        }
    }
}

/// Resolve once the session asks to close (or drops the link)
async fn wait_for_close(cmd_rx: &mut mpsc::Receiver<LinkCommand>) {
    loop {
        match cmd_rx.recv().await {
            Some(LinkCommand::Send(_)) => {
                warn!("Dropping frame queued before the channel opened");
            }
            Some(LinkCommand::Close) | None => return,
        }
    }
}

/// Turn an inbound text frame into a session event
fn classify(ctx: &LinkContext, text: String) -> Option<ChannelEvent> {
    match codec::decode(&text) {
        Ok(Inbound::Message(message)) => Some(ChannelEvent::Message { raw: text, message }),
        Ok(Inbound::Ack(ack)) => Some(ChannelEvent::Acknowledged { raw: text, ack }),
        Ok(Inbound::Error(err)) => Some(ChannelEvent::Errored {
            message: err.message,
            terminal: false,
        }),
        Ok(Inbound::Ping { ts }) => {
            trace!("[{}#{}] ping ts={}", ctx.kind, ctx.generation, ts);
            None
        }
        Ok(Inbound::Action(action)) => {
            debug!(
                "[{}#{}] Ignoring action {:?} addressed to a device",
                ctx.kind,
                ctx.generation,
                action.first_action()
            );
            None
        }
        Err(e) => {
            warn!("[{}#{}] Undecodable frame: {}", ctx.kind, ctx.generation, e);
            None
        }
    }
}
