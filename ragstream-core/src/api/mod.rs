//! Non-streaming backend endpoints.
//!
//! [`BackendApi`] is the seam between the coordinators and the server's REST
//! surface. [`HttpBackend`] talks to a real server; [`InMemoryBackend`]
//! keeps everything in process.

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::InMemoryBackend;

use crate::error::ApiError;
use crate::types::{
    ChatPrompt, ChatReply, ConnectionTest, Connector, ConnectorCreate, Conversation, ConversationDetail, Document,
    Settings, SettingsUpdate, SyncAccepted,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A file to upload for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// Response of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
}

/// The backend's REST surface.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn create_conversation(&self, title: &str) -> Result<Conversation, ApiError>;

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError>;

    /// Ask a question and wait for the whole answer. The exchange is
    /// persisted in `prompt.conversation_id`, or in a new conversation.
    async fn send_message(&self, prompt: &ChatPrompt) -> Result<ChatReply, ApiError>;

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError>;

    /// Upload files; the server answers with one document per file.
    async fn upload_documents(&self, files: Vec<UploadFile>) -> Result<Vec<Document>, ApiError>;

    async fn ingest_url(&self, url: &str) -> Result<Document, ApiError>;

    async fn delete_document(&self, id: &str) -> Result<(), ApiError>;

    async fn list_connectors(&self) -> Result<Vec<Connector>, ApiError>;

    async fn create_connector(&self, request: &ConnectorCreate) -> Result<Connector, ApiError>;

    async fn test_connector(&self, id: &str) -> Result<ConnectionTest, ApiError>;

    /// Ask the server to start a sync. Acceptance is not completion.
    async fn sync_connector(&self, id: &str) -> Result<SyncAccepted, ApiError>;

    async fn delete_connector(&self, id: &str) -> Result<(), ApiError>;

    async fn get_settings(&self) -> Result<Settings, ApiError>;

    async fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings, ApiError>;

    async fn health(&self) -> Result<Health, ApiError>;
}
