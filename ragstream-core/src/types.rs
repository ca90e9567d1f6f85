//! Core type definitions shared by the streaming layer and the REST client.
//!
//! Conversations, messages, documents, connectors and settings as the
//! backend reports them. Timestamps are kept as the server's ISO-8601
//! strings; the client never does arithmetic on them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A retrieved passage cited by an assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub doc_name: String,
    #[serde(default)]
    pub page: Option<u32>,
    pub chunk_text: String,
    /// Relevance in `[0, 1]`.
    pub relevance_score: f64,
}

/// Client-side render state of a message. Never sent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageState {
    /// Persisted or frozen by a `done` event.
    #[default]
    Complete,
    /// Still receiving tokens.
    Streaming,
    /// The turn ended without `done`; content holds whatever arrived.
    Failed { reason: String },
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    pub created_at: String,
    #[serde(skip)]
    pub state: MessageState,
}

impl Message {
    /// A user message created locally on send.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            sources: None,
            created_at: now_iso(),
            state: MessageState::Complete,
        }
    }

    /// An empty assistant placeholder that tokens are appended to.
    pub fn assistant_placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: String::new(),
            sources: None,
            created_at: now_iso(),
            state: MessageState::Streaming,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state == MessageState::Streaming
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, MessageState::Failed { .. })
    }
}

/// Conversation summary as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    /// A local stand-in used until the backend's copy is loaded.
    pub fn untitled(id: impl Into<String>) -> Self {
        let now = now_iso();
        Self {
            id: id.into(),
            title: "New Chat".to_string(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Conversation with its ordered messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationDetail {
    pub fn summary(&self) -> Conversation {
        Conversation {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

/// Processing-pipeline state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    /// Position in the pipeline; status never moves to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            DocumentStatus::Pending => 0,
            DocumentStatus::Processing => 1,
            DocumentStatus::Completed | DocumentStatus::Failed => 2,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Completed => write!(f, "completed"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Where a document came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Upload,
    Url,
    Connector,
}

fn default_document_status() -> DocumentStatus {
    DocumentStatus::Completed
}

/// A document in the searchable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    /// Older servers only report a file extension, or `"url"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default = "default_document_status")]
    pub status: DocumentStatus,
    /// Only meaningful while the status is `pending` or `processing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub chunk_count: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Document {
    /// Effective origin, falling back to the legacy `file_type` field.
    pub fn source_type(&self) -> SourceType {
        match (self.source_type, self.file_type.as_deref()) {
            (Some(source), _) => source,
            (None, Some("url")) => SourceType::Url,
            (None, _) => SourceType::Upload,
        }
    }

    /// Progress as it should be shown: hidden once the status is terminal.
    pub fn visible_progress(&self) -> Option<u8> {
        if self.status.is_terminal() {
            None
        } else {
            Some(self.progress.unwrap_or(0))
        }
    }

    pub fn is_in_flight(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Connection state of an external connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    Connected,
    #[default]
    Disconnected,
    Syncing,
    Error,
}

impl ConnectorStatus {
    /// Statuses that end a sync as reported by the server.
    pub fn ends_sync(self) -> bool {
        matches!(self, ConnectorStatus::Connected | ConnectorStatus::Error)
    }
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorStatus::Connected => write!(f, "connected"),
            ConnectorStatus::Disconnected => write!(f, "disconnected"),
            ConnectorStatus::Syncing => write!(f, "syncing"),
            ConnectorStatus::Error => write!(f, "error"),
        }
    }
}

/// Kind of external system a connector pulls documents from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Notion,
    Confluence,
    GoogleDrive,
    S3,
    Web,
    #[serde(untagged)]
    Other(String),
}

impl std::str::FromStr for ConnectorType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "notion" => ConnectorType::Notion,
            "confluence" => ConnectorType::Confluence,
            "google_drive" | "gdrive" => ConnectorType::GoogleDrive,
            "s3" => ConnectorType::S3,
            "web" => ConnectorType::Web,
            _ => ConnectorType::Other(s.to_string()),
        })
    }
}

impl std::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorType::Notion => write!(f, "notion"),
            ConnectorType::Confluence => write!(f, "confluence"),
            ConnectorType::GoogleDrive => write!(f, "google_drive"),
            ConnectorType::S3 => write!(f, "s3"),
            ConnectorType::Web => write!(f, "web"),
            ConnectorType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// An external document source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    #[serde(default)]
    pub status: ConnectorStatus,
    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub last_synced: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Request body for creating a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorCreate {
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Result of a connector connectivity test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub ok: bool,
    #[serde(default)]
    pub message: String,
}

/// Body of the non-streaming chat endpoint. Without a conversation id the
/// server starts a new conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// A complete answer from the non-streaming chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub conversation_id: String,
}

/// Acknowledgement that a sync job was accepted (not completed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAccepted {
    pub status: String,
}

/// Backend RAG settings. Opaque to the streaming core: displayed and
/// edited, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub llm_provider: String,
    #[serde(default)]
    pub openai_model: String,
    #[serde(default)]
    pub watsonx_model: String,
    pub chunk_size: u32,
    pub chunk_overlap: u32,
    pub retrieval_top_k: u32,
    pub rerank_top_k: u32,
    pub bm25_weight: f64,
    pub vector_weight: f64,
}

/// Partial settings update; unset fields are left untouched by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groq_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watsonx_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watsonx_project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watsonx_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watsonx_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_overlap: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f64>,
}

impl SettingsUpdate {
    /// Set a single field from a `key=value` pair.
    ///
    /// Values are parsed according to the field's type; unknown keys are
    /// rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
            value
                .parse()
                .map_err(|_| format!("invalid value '{}' for {}", value, key))
        }

        match key {
            "llm_provider" => self.llm_provider = Some(value.to_string()),
            "openai_api_key" => self.openai_api_key = Some(value.to_string()),
            "groq_api_key" => self.groq_api_key = Some(value.to_string()),
            "google_api_key" => self.google_api_key = Some(value.to_string()),
            "watsonx_api_key" => self.watsonx_api_key = Some(value.to_string()),
            "watsonx_project_id" => self.watsonx_project_id = Some(value.to_string()),
            "watsonx_url" => self.watsonx_url = Some(value.to_string()),
            "openai_model" => self.openai_model = Some(value.to_string()),
            "watsonx_model" => self.watsonx_model = Some(value.to_string()),
            "chunk_size" => self.chunk_size = Some(parse(key, value)?),
            "chunk_overlap" => self.chunk_overlap = Some(parse(key, value)?),
            "retrieval_top_k" => self.retrieval_top_k = Some(parse(key, value)?),
            "rerank_top_k" => self.rerank_top_k = Some(parse(key, value)?),
            "bm25_weight" => self.bm25_weight = Some(parse(key, value)?),
            "vector_weight" => self.vector_weight = Some(parse(key, value)?),
            other => return Err(format!("unknown setting: {}", other)),
        }
        Ok(())
    }
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_message_from_server_defaults_complete() {
        let json = r#"{
            "id": "m1",
            "role": "assistant",
            "content": "hello",
            "sources": null,
            "created_at": "2024-05-01T10:00:00"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.state, MessageState::Complete);
        assert!(msg.sources.is_none());
    }

    #[test]
    fn test_message_state_not_serialized() {
        let mut msg = Message::assistant_placeholder("a1");
        msg.state = MessageState::Failed {
            reason: "reset".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("state").is_none());
    }

    #[test]
    fn test_document_legacy_fields() {
        let json = r#"{
            "id": "d1",
            "filename": "https://example.com/page",
            "file_type": "url",
            "file_size": 0,
            "chunk_count": 12,
            "created_at": "2024-05-01T10:00:00"
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.source_type(), SourceType::Url);
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.visible_progress(), None);
    }

    #[test]
    fn test_document_visible_progress() {
        let json = r#"{"id":"d2","filename":"a.pdf","status":"processing","progress":40}"#;
        let mut doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.visible_progress(), Some(40));
        doc.status = DocumentStatus::Failed;
        assert_eq!(doc.visible_progress(), None);
    }

    #[test]
    fn test_document_status_rank() {
        assert!(DocumentStatus::Pending.rank() < DocumentStatus::Processing.rank());
        assert_eq!(
            DocumentStatus::Completed.rank(),
            DocumentStatus::Failed.rank()
        );
        assert!(DocumentStatus::Failed.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
    }

    #[test]
    fn test_connector_type_parsing() {
        assert_eq!(
            "google_drive".parse::<ConnectorType>().unwrap(),
            ConnectorType::GoogleDrive
        );
        assert_eq!(
            "sharepoint".parse::<ConnectorType>().unwrap(),
            ConnectorType::Other("sharepoint".into())
        );
        let json = r#"{"id":"c1","name":"Wiki","type":"confluence","status":"syncing","document_count":4}"#;
        let connector: Connector = serde_json::from_str(json).unwrap();
        assert_eq!(connector.connector_type, ConnectorType::Confluence);
        assert_eq!(connector.status, ConnectorStatus::Syncing);
        assert!(connector.last_synced.is_none());
    }

    #[test]
    fn test_unknown_connector_type_round_trips() {
        let json = r#"{"id":"c2","name":"X","type":"sharepoint"}"#;
        let connector: Connector = serde_json::from_str(json).unwrap();
        assert_eq!(
            connector.connector_type,
            ConnectorType::Other("sharepoint".into())
        );
        assert_eq!(connector.status, ConnectorStatus::Disconnected);
        let back = serde_json::to_value(&connector).unwrap();
        assert_eq!(back["type"], "sharepoint");
    }

    #[test]
    fn test_settings_update_set() {
        let mut update = SettingsUpdate::default();
        update.set("chunk_size", "512").unwrap();
        update.set("bm25_weight", "0.3").unwrap();
        update.set("llm_provider", "groq").unwrap();
        assert_eq!(update.chunk_size, Some(512));
        assert_eq!(update.bm25_weight, Some(0.3));
        assert!(update.set("chunk_size", "big").is_err());
        assert!(update.set("temperature", "1").is_err());

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 3);
    }
}
