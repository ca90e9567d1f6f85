//! Text-frame transports underneath the connection manager.
//!
//! A [`Transport`] turns a [`StreamKey`] into a live [`TransportLink`]: an
//! outbound queue of text frames and an inbound queue of [`Inbound`] items.
//! [`WsTransport`] speaks WebSocket via `tokio-tungstenite`;
//! [`MemoryTransport`] hands the server side of each link to the caller,
//! which is how the protocols are exercised without a network.

use crate::connection::StreamKey;
use crate::error::StreamError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

/// Something the transport observed on the inbound side of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One text frame.
    Frame(String),
    /// The remote end closed the connection.
    Closed,
    /// The connection failed.
    Error(String),
}

/// Both directions of one live connection.
///
/// Dropping `outbound` asks the transport to close the connection.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<Inbound>,
}

/// Opens connections for stream keys.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect the stream for `key`. Resolves once the connection is open.
    async fn connect(&self, key: &StreamKey) -> Result<TransportLink, StreamError>;
}

/// WebSocket transport: `<base>/ws/chat/<id>` and `<base>/ws/ingest/<id>`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
    buffer: usize,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>, buffer: usize) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            buffer: buffer.max(1),
        }
    }

    /// Full URL for a stream key.
    pub fn url_for(&self, key: &StreamKey) -> String {
        format!("{}{}", self.base_url, key.path())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, key: &StreamKey) -> Result<TransportLink, StreamError> {
        let url = self.url_for(key);
        debug!(%key, url = %url, "Opening WebSocket");

        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| StreamError::Transport {
                    key: key.to_string(),
                    message: format!("connect to {} failed: {}", url, e),
                })?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.buffer);
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(self.buffer);

        // Writer: forward queued frames, then close once the queue is dropped.
        let writer_key = key.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                    warn!(key = %writer_key, error = %e, "WebSocket send failed");
                    return;
                }
            }
            let _ = write.send(WsMessage::Close(None)).await;
            debug!(key = %writer_key, "WebSocket writer finished");
        });

        // Reader: translate socket messages into inbound items.
        let reader_key = key.clone();
        tokio::spawn(async move {
            let terminal = loop {
                let item = match read.next().await {
                    Some(Ok(WsMessage::Text(text))) => Inbound::Frame(text.as_str().to_owned()),
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => Inbound::Frame(text),
                        Err(_) => {
                            warn!(key = %reader_key, "Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break Inbound::Closed,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Inbound::Error(e.to_string()),
                };
                if in_tx.send(item).await.is_err() {
                    // Receiver gone: the channel was closed locally.
                    return;
                }
            };
            let _ = in_tx.send(terminal).await;
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// In-process transport. Every successful `connect` produces a
/// [`MemoryPeer`] on the paired [`MemoryAcceptor`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
    buffer: usize,
}

/// Receives the server side of each connection made through a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                peers: tx,
                refuse: Arc::new(AtomicBool::new(false)),
                buffer: 64,
            },
            MemoryAcceptor { peers: rx },
        )
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, key: &StreamKey) -> Result<TransportLink, StreamError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StreamError::Transport {
                key: key.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let (out_tx, out_rx) = mpsc::channel(self.buffer);
        let (in_tx, in_rx) = mpsc::channel(self.buffer);
        let peer = MemoryPeer {
            key: key.clone(),
            from_client: out_rx,
            to_client: in_tx,
        };
        self.peers.send(peer).map_err(|_| StreamError::Transport {
            key: key.to_string(),
            message: "acceptor dropped".to_string(),
        })?;

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

impl MemoryAcceptor {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Take a connection if one is already waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    key: StreamKey,
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<Inbound>,
}

impl MemoryPeer {
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Next frame sent by the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Push a raw text frame. Returns `false` if the client is gone.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(Inbound::Frame(text.into()))
            .await
            .is_ok()
    }

    /// Push a serializable event as a JSON frame.
    pub async fn send_json<T: serde::Serialize>(&self, event: &T) -> bool {
        match serde_json::to_string(event) {
            Ok(text) => self.send_text(text).await,
            Err(_) => false,
        }
    }

    /// Close the connection from the server side.
    pub async fn close(self) {
        let _ = self.to_client.send(Inbound::Closed).await;
    }

    /// Fail the connection with a transport error.
    pub async fn fail(self, message: impl Into<String>) {
        let _ = self.to_client.send(Inbound::Error(message.into())).await;
    }

    /// Whether the client has dropped its end.
    pub fn is_client_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
