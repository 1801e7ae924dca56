//! Channel trait abstraction for pluggable socket backends

use anyhow::Result;
use async_trait::async_trait;

/// A frame received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Close frame with status code and reason
    Close { code: u16, reason: String },
}

/// Write half of an open channel
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the channel gracefully
    async fn close(&mut self) -> Result<()>;
}

/// Read half of an open channel
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the connection is gone.
    ///
    /// Must be cancel safe: it is polled inside `tokio::select!`.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;
}

/// Write and read halves of a freshly opened channel
pub type ChannelHalves = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Factory for opening channel connections
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Open a connection to `url`, returning both halves on success
    async fn connect(&self, url: &str) -> Result<ChannelHalves>;

    /// Human-readable name for this backend
    fn name(&self) -> &'static str;
}
