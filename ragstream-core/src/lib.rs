//! # Ragstream Core
//!
//! Real-time event delivery for a retrieval-augmented assistant client.
//! Provides the event envelope codec, the keyed connection manager, the chat
//! and ingestion stream protocols, connector sync coordination and the
//! client state projector.

pub mod api;
pub mod chat;
pub mod client;
pub mod config;
pub mod connection;
pub mod connectors;
pub mod envelope;
pub mod error;
pub mod ingestion;
pub mod projector;
pub mod transport;
pub mod types;

// Re-export commonly used types at the crate root.
pub use api::{BackendApi, Health, HttpBackend, InMemoryBackend, UploadFile};
pub use chat::{ChatClient, ChatState, ChatTurn, TurnHandle};
pub use client::RagClient;
pub use config::{ClientConfig, load_config};
pub use connection::{ChannelHandle, ChannelHandler, ChannelOptions, ConnectionManager, StreamKey};
pub use connectors::ConnectorSyncCoordinator;
pub use envelope::{ChannelKind, ChatEvent, ChatRequest, Envelope, IngestionEvent};
pub use error::{ApiError, ConfigError, RagstreamError, Result, StreamError};
pub use ingestion::{DocumentTracker, IngestionWatcher, PollPolicy};
pub use projector::{ConversationView, ProjectorHandle, StateProjector, ViewModel, ViewUpdate};
pub use transport::{MemoryAcceptor, MemoryPeer, MemoryTransport, Transport, WsTransport};
pub use types::{
    ChatPrompt, ChatReply, ConnectionTest, Connector, ConnectorCreate, ConnectorStatus, ConnectorType, Conversation,
    ConversationDetail, Document, DocumentStatus, Message, MessageState, Role, Settings,
    SettingsUpdate, Source, SourceType, SyncAccepted,
};
