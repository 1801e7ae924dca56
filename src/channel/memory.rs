//! In-memory channel backend for tests
//!
//! Every successful `connect` hands the test a [`MemoryRemote`]: the broker
//! side of the connection. The test injects frames with it and observes what
//! the client wrote.

use crate::channel::traits::{ChannelConnector, ChannelHalves, Frame, FrameSink, FrameSource};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Broker side of an in-memory connection
pub struct MemoryRemote {
    pub url: String,
    inbound_tx: mpsc::UnboundedSender<Frame>,
    outbound_rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryRemote {
    /// Deliver a text frame to the client
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.inbound_tx.send(Frame::Text(text.into()));
    }

    /// Close the connection from the broker side
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.inbound_tx.send(Frame::Close {
            code,
            reason: reason.into(),
        });
    }

    /// Next frame written by the client
    pub async fn next_sent(&mut self) -> Option<Frame> {
        self.outbound_rx.recv().await
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.tx
            .send(Frame::Text(text))
            .map_err(|_| anyhow!("remote hung up"))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx
            .send(Frame::Close {
                code: 1000,
                reason: String::new(),
            })
            .map_err(|_| anyhow!("remote hung up"))
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Connector producing in-memory connections
pub struct MemoryConnector {
    remotes_tx: mpsc::UnboundedSender<MemoryRemote>,
    refuse: AtomicBool,
}

impl MemoryConnector {
    /// Create a connector and the receiver of the remotes it opens
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryRemote>) {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        let connector = Self {
            remotes_tx,
            refuse: AtomicBool::new(false),
        };
        (connector, remotes_rx)
    }

    /// Make subsequent connects fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<ChannelHalves> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        self.remotes_tx
            .send(MemoryRemote {
                url: url.to_string(),
                inbound_tx,
                outbound_rx,
            })
            .map_err(|_| anyhow!("test dropped the remote receiver"))?;

        Ok((
            Box::new(MemorySink { tx: outbound_tx }),
            Box::new(MemorySource { rx: inbound_rx }),
        ))
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
