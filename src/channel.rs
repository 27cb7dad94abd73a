// src/channel.rs
//! Message channel the handshake runs over.
//!
//! [`Connector::open`] yields a [`Channel`] once the peer is reachable. The
//! channel carries UTF-8 text frames in both directions and reports errors and
//! closure as [`ChannelEvent`]s, so the session sees every inbound signal in
//! arrival order through a single `recv`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::HandshakeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: Channel;

    async fn open(&self) -> Result<Self::Channel, HandshakeError>;
}

#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, text: String) -> Result<(), HandshakeError>;

    /// Next inbound signal. Returns `Closed` forever once the peer is gone.
    async fn recv(&mut self) -> ChannelEvent;

    async fn close(&mut self);
}

// ---------- WEBSOCKET ---------- //

pub struct WsConnector {
    url: String,
    origin: Option<String>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, origin: Option<String>) -> Self {
        Self { url: url.into(), origin }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn open(&self) -> Result<WsChannel, HandshakeError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| HandshakeError::Transport(format!("invalid url {}: {e}", self.url)))?;
        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| HandshakeError::Transport(format!("invalid origin: {e}")))?;
            request.headers_mut().insert("Origin", value);
        }

        info!(url = %self.url, "connecting");
        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| HandshakeError::Transport(e.to_string()))?;
        debug!(status = %response.status(), "websocket upgraded");
        Ok(WsChannel { stream, closed: false })
    }
}

pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, text: String) -> Result<(), HandshakeError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| HandshakeError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> ChannelEvent {
        if self.closed {
            return ChannelEvent::Closed { code: None, reason: "already closed".into() };
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return ChannelEvent::Message(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return ChannelEvent::Message(text),
                    Err(_) => warn!("dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        debug!(error = %e, "pong not sent");
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    self.closed = true;
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return ChannelEvent::Closed { code, reason };
                }
                Some(Err(e)) => return ChannelEvent::Error(e.to_string()),
                None => {
                    self.closed = true;
                    return ChannelEvent::Closed { code: None, reason: "stream ended".into() };
                }
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.close(None).await;
        }
    }
}

// ---------- IN-MEMORY ---------- //

pub mod memory {
    //! Channel backed by tokio mpsc queues. The test side holds a
    //! [`MemoryPeer`] and plays the gateway.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{Channel, ChannelEvent, Connector};
    use crate::error::HandshakeError;

    pub struct MemoryConnector {
        halves: Mutex<Option<MemoryChannel>>,
        refuse: Option<String>,
    }

    pub struct MemoryPeer {
        pub inbound: mpsc::UnboundedSender<ChannelEvent>,
        pub outbound: mpsc::UnboundedReceiver<String>,
        closed: Arc<AtomicBool>,
    }

    impl MemoryPeer {
        pub fn push(&self, text: impl Into<String>) {
            let _ = self.inbound.send(ChannelEvent::Message(text.into()));
        }

        pub fn close(&self, code: u16, reason: &str) {
            let _ = self.inbound.send(ChannelEvent::Closed {
                code: Some(code),
                reason: reason.into(),
            });
        }

        /// True once the session has released its end.
        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    pub struct MemoryChannel {
        rx: mpsc::UnboundedReceiver<ChannelEvent>,
        tx: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    impl MemoryConnector {
        pub fn pair() -> (Self, MemoryPeer) {
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));
            let channel = MemoryChannel { rx: in_rx, tx: out_tx, closed: closed.clone() };
            let connector = Self { halves: Mutex::new(Some(channel)), refuse: None };
            let peer = MemoryPeer { inbound: in_tx, outbound: out_rx, closed };
            (connector, peer)
        }

        /// Connector whose `open` always fails with `reason`.
        pub fn refusing(reason: &str) -> Self {
            Self { halves: Mutex::new(None), refuse: Some(reason.into()) }
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        type Channel = MemoryChannel;

        async fn open(&self) -> Result<MemoryChannel, HandshakeError> {
            if let Some(reason) = &self.refuse {
                return Err(HandshakeError::Transport(reason.clone()));
            }
            self.halves
                .lock()
                .map_err(|_| HandshakeError::Transport("connector poisoned".into()))?
                .take()
                .ok_or_else(|| HandshakeError::Transport("channel already opened".into()))
        }
    }

    #[async_trait]
    impl Channel for MemoryChannel {
        async fn send(&mut self, text: String) -> Result<(), HandshakeError> {
            self.tx
                .send(text)
                .map_err(|_| HandshakeError::Transport("peer gone".into()))
        }

        async fn recv(&mut self) -> ChannelEvent {
            match self.rx.recv().await {
                Some(ev) => ev,
                None => ChannelEvent::Closed { code: None, reason: "peer dropped".into() },
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
            self.rx.close();
        }
    }

}
