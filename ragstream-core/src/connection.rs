//! Keyed registry of streaming channels.
//!
//! The [`ConnectionManager`] owns at most one live channel per [`StreamKey`].
//! Each channel runs on its own task, which connects through the configured
//! [`Transport`], decodes frames with the key's codec and hands them to the
//! channel's [`ChannelHandler`] one at a time, in arrival order.
//!
//! Callback guarantees:
//! - `on_open` runs before any `on_event`.
//! - A remote close calls `on_close` exactly once; a transport failure or
//!   idle timeout calls `on_error` once and then `on_close`.
//! - After [`ConnectionManager::close`] returns, no callback runs for that
//!   channel, and `on_close` is not called for a local close.
//!
//! No reconnection is attempted; that is the caller's policy.

use crate::envelope::{self, ChannelKind, Envelope};
use crate::error::StreamError;
use crate::transport::{Inbound, Transport};
use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Identity of a logical stream: `chat:<conversationId>` or `ingest:<documentId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    kind: ChannelKind,
    id: String,
}

impl StreamKey {
    pub fn chat(conversation_id: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::Chat,
            id: conversation_id.into(),
        }
    }

    pub fn ingest(document_id: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::Ingest,
            id: document_id.into(),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Server path for this stream, e.g. `/ws/chat/<id>`.
    pub fn path(&self) -> String {
        format!("/ws/{}/{}", self.kind.prefix(), self.id)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.id)
    }
}

impl FromStr for StreamKey {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StreamError::InvalidKey { key: s.to_string() };
        let (prefix, id) = s.split_once(':').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }
        match prefix {
            "chat" => Ok(StreamKey::chat(id)),
            "ingest" => Ok(StreamKey::ingest(id)),
            _ => Err(invalid()),
        }
    }
}

/// Receives the events of one channel.
///
/// All methods are called from the channel's task, never concurrently.
/// Handlers must not call back into the [`ConnectionManager`] synchronously;
/// hand work off to a task or a queue instead.
pub trait ChannelHandler: Send + 'static {
    /// The transport connection is open; queued sends are being flushed.
    fn on_open(&mut self) {}

    /// A decoded frame. Return `ControlFlow::Break(())` to close the channel
    /// (no `on_close` follows).
    fn on_event(&mut self, envelope: Envelope) -> ControlFlow<()>;

    /// The channel failed. `on_close` follows immediately.
    fn on_error(&mut self, _error: &StreamError) {}

    /// The channel ended without a local close.
    fn on_close(&mut self) {}
}

/// Reference to a channel returned by [`ConnectionManager::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    key: StreamKey,
    id: u64,
}

impl ChannelHandle {
    pub fn key(&self) -> &StreamKey {
        &self.key
    }
}

/// Per-kind channel settings.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Bounded queue size for outbound frames.
    pub buffer: usize,
    /// Idle ceiling for chat channels.
    pub chat_idle_timeout: Option<Duration>,
    /// Idle ceiling for ingestion channels.
    pub ingest_idle_timeout: Option<Duration>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            buffer: 256,
            chat_idle_timeout: None,
            ingest_idle_timeout: None,
        }
    }
}

impl ChannelOptions {
    pub fn from_config(config: &crate::config::ClientConfig) -> Self {
        Self {
            buffer: config.channel_buffer,
            chat_idle_timeout: config.chat.stall_timeout(),
            ingest_idle_timeout: config.ingestion.stall_timeout(),
        }
    }

    fn idle_timeout(&self, kind: ChannelKind) -> Option<Duration> {
        match kind {
            ChannelKind::Chat => self.chat_idle_timeout,
            ChannelKind::Ingest => self.ingest_idle_timeout,
        }
    }
}

/// Handler plus the flag that silences it once the channel is closed.
struct HandlerSlot {
    handler: Box<dyn ChannelHandler>,
    closed: bool,
}

struct ChannelShared {
    slot: Mutex<HandlerSlot>,
}

impl ChannelShared {
    fn lock(&self) -> MutexGuard<'_, HandlerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn open(&self) {
        let mut slot = self.lock();
        if !slot.closed {
            slot.handler.on_open();
        }
    }

    /// Deliver an event; returns `Break` if the handler asked to close.
    fn event(&self, envelope: Envelope) -> ControlFlow<()> {
        let mut slot = self.lock();
        if slot.closed {
            return ControlFlow::Break(());
        }
        let flow = slot.handler.on_event(envelope);
        if flow.is_break() {
            slot.closed = true;
        }
        flow
    }

    /// Terminal delivery: optional error, then close, then silence.
    fn finish(&self, error: Option<&StreamError>) {
        let mut slot = self.lock();
        if slot.closed {
            return;
        }
        if let Some(error) = error {
            slot.handler.on_error(error);
        }
        slot.handler.on_close();
        slot.closed = true;
    }

    /// Silence the handler without any callback. Waits for an in-flight
    /// callback to return.
    fn silence(&self) {
        self.lock().closed = true;
    }
}

struct ChannelEntry {
    id: u64,
    outbound: mpsc::Sender<String>,
    shared: Arc<ChannelShared>,
}

type Registry = Arc<Mutex<HashMap<StreamKey, ChannelEntry>>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<StreamKey, ChannelEntry>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the live channels, one per stream key.
#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    registry: Registry,
    next_id: Arc<AtomicU64>,
    options: ChannelOptions,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("live", &self.live_count())
            .field("options", &self.options)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, options: ChannelOptions) -> Self {
        Self {
            transport,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            options,
        }
    }

    /// Open the channel for `key`, or reuse the live one.
    ///
    /// When a channel for `key` is already live its handle is returned and
    /// `handler` is dropped unused. Must be called from within a Tokio runtime.
    pub fn open(&self, key: StreamKey, handler: impl ChannelHandler) -> ChannelHandle {
        let mut registry = lock_registry(&self.registry);

        if let Some(entry) = registry.get(&key)
            && !entry.shared.is_closed()
        {
            debug!(%key, "Reusing live channel");
            return ChannelHandle { key, id: entry.id };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (out_tx, out_rx) = mpsc::channel(self.options.buffer.max(1));
        let shared = Arc::new(ChannelShared {
            slot: Mutex::new(HandlerSlot {
                handler: Box::new(handler),
                closed: false,
            }),
        });

        registry.insert(
            key.clone(),
            ChannelEntry {
                id,
                outbound: out_tx,
                shared: shared.clone(),
            },
        );
        drop(registry);

        info!(%key, channel_id = id, "Opening channel");
        tokio::spawn(run_channel(ChannelTask {
            key: key.clone(),
            id,
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            shared,
            queued: out_rx,
            idle_timeout: self.options.idle_timeout(key.kind()),
        }));

        ChannelHandle { key, id }
    }

    /// Queue a text frame on a chat channel.
    ///
    /// Frames sent before the transport is open are flushed, in order, as
    /// soon as it opens.
    pub async fn send(&self, handle: &ChannelHandle, payload: String) -> Result<(), StreamError> {
        if !handle.key.kind().is_writable() {
            return Err(StreamError::NotWritable {
                key: handle.key.to_string(),
            });
        }

        let outbound = {
            let registry = lock_registry(&self.registry);
            match registry.get(&handle.key) {
                Some(entry) if entry.id == handle.id => entry.outbound.clone(),
                _ => {
                    return Err(StreamError::UnknownChannel {
                        key: handle.key.to_string(),
                    });
                }
            }
        };

        outbound
            .send(payload)
            .await
            .map_err(|_| StreamError::UnknownChannel {
                key: handle.key.to_string(),
            })
    }

    /// Close a channel. No handler callback runs after this returns.
    ///
    /// Returns `false` if the channel had already ended.
    pub fn close(&self, handle: &ChannelHandle) -> bool {
        let entry = {
            let mut registry = lock_registry(&self.registry);
            match registry.get(&handle.key) {
                Some(entry) if entry.id == handle.id => registry.remove(&handle.key),
                _ => None,
            }
        };

        match entry {
            Some(entry) => {
                // Dropping the outbound sender stops the channel task.
                let was_open = !entry.shared.is_closed();
                entry.shared.silence();
                info!(key = %handle.key, "Closed channel");
                was_open
            }
            None => false,
        }
    }

    /// Close every live channel.
    pub fn close_all(&self) -> usize {
        let entries: Vec<ChannelEntry> = {
            let mut registry = lock_registry(&self.registry);
            registry.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            entry.shared.silence();
        }
        entries.len()
    }

    /// Whether a live channel exists for `key`.
    pub fn is_open(&self, key: &StreamKey) -> bool {
        lock_registry(&self.registry)
            .get(key)
            .is_some_and(|entry| !entry.shared.is_closed())
    }

    /// Number of live channels.
    pub fn live_count(&self) -> usize {
        lock_registry(&self.registry)
            .values()
            .filter(|entry| !entry.shared.is_closed())
            .count()
    }
}

struct ChannelTask {
    key: StreamKey,
    id: u64,
    transport: Arc<dyn Transport>,
    registry: Registry,
    shared: Arc<ChannelShared>,
    queued: mpsc::Receiver<String>,
    idle_timeout: Option<Duration>,
}

impl ChannelTask {
    fn deregister(&self) {
        let mut registry = lock_registry(&self.registry);
        if registry.get(&self.key).is_some_and(|e| e.id == self.id) {
            registry.remove(&self.key);
        }
    }
}

async fn idle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Decode and deliver every frame in one transport message.
fn dispatch(key: &StreamKey, shared: &ChannelShared, text: &str) -> ControlFlow<()> {
    for frame in envelope::split_frames(text) {
        match envelope::decode(key.kind(), frame) {
            Ok(envelope) => {
                debug!(%key, "Dispatching frame");
                if shared.event(envelope).is_break() {
                    return ControlFlow::Break(());
                }
            }
            Err(error) if error.is_recoverable() => {
                warn!(%key, error = %error, "Dropping malformed frame")
            }
            Err(error) => {
                warn!(%key, error = %error, "Undecodable frame ended the channel");
                shared.finish(Some(&error));
                return ControlFlow::Break(());
            }
        }
    }
    ControlFlow::Continue(())
}

async fn run_channel(mut task: ChannelTask) {
    let key = task.key.clone();

    let link = match task.transport.connect(&key).await {
        Ok(link) => link,
        Err(error) => {
            warn!(%key, error = %error, "Channel failed to connect");
            task.shared.finish(Some(&error));
            task.deregister();
            return;
        }
    };

    let outbound = link.outbound;
    let mut inbound = link.inbound;
    task.shared.open();

    let mut deadline = task.idle_timeout.map(|d| Instant::now() + d);

    loop {
        tokio::select! {
            item = inbound.recv() => {
                if let Some(timeout) = task.idle_timeout {
                    deadline = Some(Instant::now() + timeout);
                }
                match item {
                    Some(Inbound::Frame(text)) => {
                        if dispatch(&key, &task.shared, &text).is_break() {
                            debug!(%key, "Handler closed channel");
                            break;
                        }
                    }
                    Some(Inbound::Error(message)) => {
                        let error = StreamError::Transport { key: key.to_string(), message };
                        warn!(%key, error = %error, "Channel transport failed");
                        task.shared.finish(Some(&error));
                        break;
                    }
                    Some(Inbound::Closed) | None => {
                        info!(%key, "Channel closed by remote");
                        task.shared.finish(None);
                        break;
                    }
                }
            }
            payload = task.queued.recv() => {
                match payload {
                    Some(payload) => {
                        if outbound.send(payload).await.is_err() {
                            let error = StreamError::Transport {
                                key: key.to_string(),
                                message: "connection dropped while sending".to_string(),
                            };
                            task.shared.finish(Some(&error));
                            break;
                        }
                    }
                    // The registry entry is gone: closed locally.
                    None => break,
                }
            }
            _ = idle(deadline) => {
                let error = StreamError::Timeout {
                    key: key.to_string(),
                    after_secs: task.idle_timeout.map(|d| d.as_secs()).unwrap_or_default(),
                };
                warn!(%key, "Channel idle timeout");
                task.shared.finish(Some(&error));
                break;
            }
        }
    }

    task.shared.silence();
    task.deregister();
    // Dropping `outbound` closes the transport connection.
    drop(outbound);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ChatEvent;
    use crate::transport::MemoryTransport;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Open,
        Event(Envelope),
        Error(String),
        Close,
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<Seen>,
        break_on_done: bool,
    }

    impl ChannelHandler for Recorder {
        fn on_open(&mut self) {
            let _ = self.tx.send(Seen::Open);
        }

        fn on_event(&mut self, envelope: Envelope) -> ControlFlow<()> {
            let done = envelope == Envelope::Chat(ChatEvent::Done);
            let _ = self.tx.send(Seen::Event(envelope));
            if done && self.break_on_done {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }

        fn on_error(&mut self, error: &StreamError) {
            let _ = self.tx.send(Seen::Error(error.to_string()));
        }

        fn on_close(&mut self) {
            let _ = self.tx.send(Seen::Close);
        }
    }

    fn recorder() -> (Recorder, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Recorder {
                tx,
                break_on_done: true,
            },
            rx,
        )
    }

    fn manager(transport: MemoryTransport) -> ConnectionManager {
        ConnectionManager::new(Arc::new(transport), ChannelOptions::default())
    }

    #[test]
    fn test_stream_key_parse_and_display() {
        let key: StreamKey = "chat:abc-123".parse().unwrap();
        assert_eq!(key, StreamKey::chat("abc-123"));
        assert_eq!(key.to_string(), "chat:abc-123");
        assert_eq!(key.path(), "/ws/chat/abc-123");

        let key: StreamKey = "ingest:d1".parse().unwrap();
        assert_eq!(key.kind(), ChannelKind::Ingest);

        assert!("chat:".parse::<StreamKey>().is_err());
        assert!("video:x".parse::<StreamKey>().is_err());
        assert!("nocolon".parse::<StreamKey>().is_err());
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, mut seen) = recorder();

        mgr.open(StreamKey::chat("c1"), handler);
        let peer = acceptor.accept().await.unwrap();
        assert_eq!(seen.recv().await, Some(Seen::Open));

        for token in ["a", "b", "c"] {
            peer.send_json(&ChatEvent::token(token)).await;
        }
        for token in ["a", "b", "c"] {
            assert_eq!(
                seen.recv().await,
                Some(Seen::Event(Envelope::Chat(ChatEvent::token(token))))
            );
        }
    }

    #[tokio::test]
    async fn test_open_is_idempotent_while_live() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (first, _seen_first) = recorder();
        let (second, _seen_second) = recorder();

        let h1 = mgr.open(StreamKey::chat("c1"), first);
        let h2 = mgr.open(StreamKey::chat("c1"), second);
        assert_eq!(h1, h2);
        assert_eq!(mgr.live_count(), 1);

        let _peer = acceptor.accept().await.unwrap();
        tokio::task::yield_now().await;
        assert!(acceptor.try_accept().is_none());
    }

    #[tokio::test]
    async fn test_send_rejected_on_ingest_channel() {
        let (transport, _acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, _seen) = recorder();

        let handle = mgr.open(StreamKey::ingest("d1"), handler);
        let err = mgr.send(&handle, "{}".into()).await.unwrap_err();
        assert!(matches!(err, StreamError::NotWritable { .. }));
    }

    #[tokio::test]
    async fn test_send_is_queued_until_open() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, _seen) = recorder();

        let handle = mgr.open(StreamKey::chat("c1"), handler);
        mgr.send(&handle, "first".into()).await.unwrap();
        mgr.send(&handle, "second".into()).await.unwrap();

        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("first"));
        assert_eq!(peer.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_kill_channel() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, mut seen) = recorder();

        mgr.open(StreamKey::chat("c1"), handler);
        let peer = acceptor.accept().await.unwrap();
        assert_eq!(seen.recv().await, Some(Seen::Open));

        peer.send_text("{garbage").await;
        peer.send_text(r#"{"no_type":true}"#).await;
        peer.send_json(&ChatEvent::token("ok")).await;

        assert_eq!(
            seen.recv().await,
            Some(Seen::Event(Envelope::Chat(ChatEvent::token("ok"))))
        );
        assert!(mgr.is_open(&StreamKey::chat("c1")));
    }

    #[tokio::test]
    async fn test_newline_delimited_payload_is_split() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, mut seen) = recorder();

        mgr.open(StreamKey::chat("c1"), handler);
        let peer = acceptor.accept().await.unwrap();
        assert_eq!(seen.recv().await, Some(Seen::Open));

        peer.send_text("{\"type\":\"token\",\"content\":\"x\"}\n{oops\n{\"type\":\"token\",\"content\":\"y\"}\n")
            .await;
        for token in ["x", "y"] {
            assert_eq!(
                seen.recv().await,
                Some(Seen::Event(Envelope::Chat(ChatEvent::token(token))))
            );
        }
    }

    #[tokio::test]
    async fn test_remote_close_calls_on_close_once() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, mut seen) = recorder();

        let key = StreamKey::ingest("d1");
        mgr.open(key.clone(), handler);
        let peer = acceptor.accept().await.unwrap();
        assert_eq!(seen.recv().await, Some(Seen::Open));

        peer.close().await;
        assert_eq!(seen.recv().await, Some(Seen::Close));
        // Sender side dropped: nothing else arrives.
        assert_eq!(seen.recv().await, None);
        assert!(!mgr.is_open(&key));
    }

    #[tokio::test]
    async fn test_transport_error_then_close() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, mut seen) = recorder();

        mgr.open(StreamKey::chat("c1"), handler);
        let peer = acceptor.accept().await.unwrap();
        assert_eq!(seen.recv().await, Some(Seen::Open));

        peer.fail("connection reset").await;
        match seen.recv().await {
            Some(Seen::Error(message)) => assert!(message.contains("connection reset")),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(seen.recv().await, Some(Seen::Close));
        assert_eq!(seen.recv().await, None);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_and_close() {
        let (transport, _acceptor) = MemoryTransport::pair();
        transport.set_refuse(true);
        let mgr = manager(transport);
        let (handler, mut seen) = recorder();

        mgr.open(StreamKey::chat("c1"), handler);
        assert!(matches!(seen.recv().await, Some(Seen::Error(_))));
        assert_eq!(seen.recv().await, Some(Seen::Close));
        assert_eq!(seen.recv().await, None);
        assert_eq!(mgr.live_count(), 0);
    }

    #[tokio::test]
    async fn test_local_close_silences_handler() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, mut seen) = recorder();

        let handle = mgr.open(StreamKey::chat("c1"), handler);
        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(seen.recv().await, Some(Seen::Open));

        assert!(mgr.close(&handle));
        assert!(!mgr.close(&handle));

        peer.send_json(&ChatEvent::token("late")).await;
        // The client side hangs up; the peer sees the end of its stream.
        assert_eq!(peer.recv().await, None);
        // No event and no on_close after a local close.
        assert_eq!(seen.recv().await, None);

        let err = mgr.send(&handle, "again".into()).await.unwrap_err();
        assert!(matches!(err, StreamError::UnknownChannel { .. }));
    }

    #[tokio::test]
    async fn test_reopen_after_close_is_fresh() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (first, _s1) = recorder();
        let (second, _s2) = recorder();

        let h1 = mgr.open(StreamKey::chat("c1"), first);
        mgr.send(&h1, "turn one".into()).await.unwrap();
        let mut old = acceptor.accept().await.unwrap();
        mgr.close(&h1);
        while old.recv().await.is_some() {}

        let h2 = mgr.open(StreamKey::chat("c1"), second);
        assert_ne!(h1, h2);

        let mut fresh = acceptor.accept().await.unwrap();
        mgr.send(&h2, "turn two".into()).await.unwrap();
        // Nothing from the earlier turn is replayed on the new connection.
        assert_eq!(fresh.recv().await.as_deref(), Some("turn two"));
    }

    #[tokio::test]
    async fn test_handler_break_closes_channel() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = manager(transport);
        let (handler, mut seen) = recorder();

        let key = StreamKey::chat("c1");
        mgr.open(key.clone(), handler);
        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(seen.recv().await, Some(Seen::Open));

        peer.send_json(&ChatEvent::Done).await;
        assert_eq!(
            seen.recv().await,
            Some(Seen::Event(Envelope::Chat(ChatEvent::Done)))
        );
        assert_eq!(peer.recv().await, None);
        assert_eq!(seen.recv().await, None);
        assert!(!mgr.is_open(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_fails_channel() {
        let (transport, mut acceptor) = MemoryTransport::pair();
        let mgr = ConnectionManager::new(
            Arc::new(transport),
            ChannelOptions {
                chat_idle_timeout: Some(Duration::from_secs(30)),
                ..ChannelOptions::default()
            },
        );
        let (handler, mut seen) = recorder();

        mgr.open(StreamKey::chat("c1"), handler);
        let _peer = acceptor.accept().await.unwrap();
        assert_eq!(seen.recv().await, Some(Seen::Open));

        match seen.recv().await {
            Some(Seen::Error(message)) => assert!(message.contains("within 30s")),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(seen.recv().await, Some(Seen::Close));
    }
}
