//! services/client/src/adapters/socket.rs
//!
//! This module contains the WebSocket adapter for the channel transport.
//! It implements the `ChannelTransport` port from the `core` crate on top of
//! tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use tutor_chat_core::ports::{ChannelConnection, ChannelTransport, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `ChannelTransport` port using a WebSocket.
#[derive(Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// Creates a new `WsTransport` dialing the given ws(s) URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

//=========================================================================================
// `ChannelTransport` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChannelTransport for WsTransport {
    async fn dial(&self) -> PortResult<Box<dyn ChannelConnection>> {
        debug!("Dialing channel at {}", self.url);
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;
        Ok(Box::new(WsConnection { inner: stream }))
    }
}

struct WsConnection {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChannelConnection for WsConnection {
    async fn send(&mut self, frame: String) -> PortResult<()> {
        self.inner
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| PortError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<PortResult<String>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Close(_)) => return None,
                // Protocol-level ping/pong and binary frames are transport
                // noise here; the application heartbeat rides text frames.
                Ok(_) => continue,
                Err(e) => return Some(Err(PortError::Transport(e.to_string()))),
            }
        }
    }
}
