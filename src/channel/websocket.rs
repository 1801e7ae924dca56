//! WebSocket backend built on tokio-tungstenite

use crate::channel::traits::{ChannelConnector, ChannelHalves, Frame, FrameSink, FrameSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer closes without a status
const NO_STATUS_RECEIVED: u16 = 1005;

/// Write half of a WebSocket connection
pub struct WebSocketSink {
    inner: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.inner.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.send(WsMessage::Close(None)).await?;
        self.inner.close().await?;
        Ok(())
    }
}

/// Read half of a WebSocket connection
pub struct WebSocketSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.inner.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(WsMessage::Binary(data)) => {
                    // The broker only speaks JSON; accept it in binary frames too
                    let text = String::from_utf8(data.to_vec()).context("Binary frame is not UTF-8");
                    return Some(text.map(Frame::Text));
                }
                Ok(WsMessage::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.as_str().to_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                    return Some(Ok(Frame::Close { code, reason }));
                }
                Ok(_) => {
                    // Ping/Pong are answered by tungstenite
                    continue;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Connector opening real WebSocket connections (ws:// and wss://)
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<ChannelHalves> {
        // The URL may carry credentials; keep it out of error messages
        let (ws, response) = connect_async(url)
            .await
            .context("WebSocket handshake failed")?;
        debug!("WebSocket handshake complete: HTTP {}", response.status());

        let (sink, source) = ws.split();
        Ok((
            Box::new(WebSocketSink { inner: sink }),
            Box::new(WebSocketSource { inner: source }),
        ))
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_name() {
        assert_eq!(WebSocketConnector.name(), "WebSocket");
    }

    #[tokio::test]
    async fn test_connect_refused_is_an_error() {
        // Port 9 (discard) is almost never listening on loopback
        let result = WebSocketConnector.connect("ws://127.0.0.1:9/websocket").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = WebSocketConnector.connect("not a url").await;
        assert!(result.is_err());
    }
}
