//! Socket transport for the telemetry stream
//!
//! The connection manager only sees [`Connector`] and [`Transport`], so the
//! reconnect logic can run against an in-memory fake
//! (see [`crate::testing::MockConnector`]).

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::types::{StreamError, StreamResult};

/// One open full-duplex text connection
#[async_trait]
pub trait Transport: Send {
    /// Send one text message
    async fn send(&mut self, text: String) -> StreamResult<()>;

    /// Wait for the next text message.
    ///
    /// Returns `None` once the remote side has closed the connection.
    async fn recv(&mut self) -> Option<StreamResult<String>>;

    /// Close the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Opens new transports to the streaming endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> StreamResult<Box<dyn Transport>>;
}

/// Connector for a `ws://` or `wss://` endpoint
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> StreamResult<Box<dyn Transport>> {
        debug!("Connecting to streaming endpoint: {}", self.url);

        let (ws, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| StreamError::Timeout(self.connect_timeout))??;

        Ok(Box::new(WebSocketTransport { ws }))
    }
}

/// [`Transport`] over a tokio-tungstenite stream
pub struct WebSocketTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> StreamResult<()> {
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<StreamResult<String>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => {
                    return Some(String::from_utf8(data.to_vec()).map_err(|e| {
                        StreamError::Transport(format!("Invalid UTF-8 in binary frame: {}", e))
                    }));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Streaming server closed the connection");
                    return None;
                }
                // tungstenite answers pings on its own
                Ok(other) => trace!("Ignoring control frame: {:?}", other),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
