use super::{BackendApi, Health, UploadFile};
use crate::error::ApiError;
use crate::types::{
    ChatPrompt, ChatReply, ConnectionTest, Connector, ConnectorCreate, ConnectorStatus,
    Conversation, ConversationDetail, Document, DocumentStatus, Message, MessageState, Role,
    Settings, SettingsUpdate, Source, SourceType, SyncAccepted, now_iso,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug)]
struct State {
    conversations: Vec<ConversationDetail>,
    documents: Vec<Document>,
    connectors: Vec<Connector>,
    settings: Settings,
    answer: Option<(String, Vec<Source>)>,
    calls: HashMap<&'static str, usize>,
}

/// In-process backend with the same observable behaviour as the server's
/// REST surface: new documents start `pending`, sync requests are accepted
/// and leave the connector `syncing` until told otherwise.
#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn default_settings() -> Settings {
    Settings {
        llm_provider: "openai".into(),
        openai_model: "gpt-4o-mini".into(),
        watsonx_model: "ibm/granite-13b-chat-v2".into(),
        chunk_size: 1000,
        chunk_overlap: 200,
        retrieval_top_k: 10,
        rerank_top_k: 5,
        bm25_weight: 0.4,
        vector_weight: 0.6,
    }
}

fn not_found(kind: &str, id: &str) -> ApiError {
    ApiError::NotFound {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                conversations: Vec::new(),
                documents: Vec::new(),
                connectors: Vec::new(),
                settings: default_settings(),
                answer: None,
                calls: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: &'static str) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        *state.calls.entry(call).or_default() += 1;
        state
    }

    /// How many times an endpoint was called, by trait method name.
    pub fn calls(&self, call: &str) -> usize {
        self.lock().calls.get(call).copied().unwrap_or_default()
    }

    pub fn insert_document(&self, document: Document) {
        self.lock().documents.push(document);
    }

    pub fn insert_connector(&self, connector: Connector) {
        self.lock().connectors.push(connector);
    }

    pub fn insert_conversation(&self, conversation: ConversationDetail) {
        self.lock().conversations.push(conversation);
    }

    /// Answer every non-streaming question with `message` and `sources`.
    /// Until set, questions are echoed back.
    pub fn set_answer(&self, message: impl Into<String>, sources: Vec<Source>) {
        self.lock().answer = Some((message.into(), sources));
    }

    /// Append a persisted message, as the server does once a turn completes.
    pub fn append_message(&self, conversation_id: &str, message: Message) -> bool {
        let mut state = self.lock();
        match state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            Some(conversation) => {
                conversation.updated_at = now_iso();
                conversation.messages.push(message);
                true
            }
            None => false,
        }
    }

    /// Move a document through the pipeline as the server's worker would.
    pub fn set_document_status(&self, id: &str, status: DocumentStatus, progress: Option<u8>) {
        let mut state = self.lock();
        if let Some(document) = state.documents.iter_mut().find(|d| d.id == id) {
            document.status = status;
            document.progress = progress;
        }
    }

    pub fn set_connector_status(&self, id: &str, status: ConnectorStatus) {
        let mut state = self.lock();
        if let Some(connector) = state.connectors.iter_mut().find(|c| c.id == id) {
            connector.status = status;
            if status == ConnectorStatus::Connected {
                connector.last_synced = Some(now_iso());
            }
        }
    }

    fn new_document(filename: String, source_type: SourceType, size: u64) -> Document {
        let file_type = match source_type {
            SourceType::Url => Some("url".to_string()),
            _ => std::path::Path::new(&filename)
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy())),
        };
        Document {
            id: Uuid::new_v4().to_string(),
            filename,
            source_type: Some(source_type),
            file_type,
            status: DocumentStatus::Pending,
            progress: Some(0),
            error_message: None,
            file_size: Some(size),
            chunk_count: None,
            created_at: Some(now_iso()),
        }
    }
}

#[async_trait]
impl BackendApi for InMemoryBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let state = self.record("list_conversations");
        let mut list: Vec<Conversation> = state
            .conversations
            .iter()
            .map(ConversationDetail::summary)
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation, ApiError> {
        let mut state = self.record("create_conversation");
        let now = now_iso();
        let detail = ConversationDetail {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        let summary = detail.summary();
        state.conversations.push(detail);
        Ok(summary)
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError> {
        let state = self.record("get_conversation");
        state
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| not_found("Conversation", id))
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.record("delete_conversation");
        let before = state.conversations.len();
        state.conversations.retain(|c| c.id != id);
        if state.conversations.len() == before {
            return Err(not_found("Conversation", id));
        }
        Ok(())
    }

    async fn send_message(&self, prompt: &ChatPrompt) -> Result<ChatReply, ApiError> {
        let mut state = self.record("send_message");
        let (answer, sources) = state
            .answer
            .clone()
            .unwrap_or_else(|| (format!("You asked: {}", prompt.message), Vec::new()));

        let index = match &prompt.conversation_id {
            Some(id) => state
                .conversations
                .iter()
                .position(|c| c.id == *id)
                .ok_or_else(|| not_found("Conversation", id))?,
            None => {
                let now = now_iso();
                state.conversations.push(ConversationDetail {
                    id: Uuid::new_v4().to_string(),
                    title: prompt.message.chars().take(50).collect(),
                    messages: Vec::new(),
                    created_at: now.clone(),
                    updated_at: now,
                });
                state.conversations.len() - 1
            }
        };

        let conversation = &mut state.conversations[index];
        conversation.messages.push(Message::user(prompt.message.clone()));
        conversation.messages.push(Message {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: answer.clone(),
            sources: Some(sources.clone()),
            created_at: now_iso(),
            state: MessageState::Complete,
        });
        conversation.updated_at = now_iso();

        Ok(ChatReply {
            message: answer,
            sources,
            conversation_id: conversation.id.clone(),
        })
    }

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        Ok(self.record("list_documents").documents.clone())
    }

    async fn upload_documents(&self, files: Vec<UploadFile>) -> Result<Vec<Document>, ApiError> {
        let mut state = self.record("upload_documents");
        let created: Vec<Document> = files
            .into_iter()
            .map(|file| {
                let size = file.bytes.len() as u64;
                Self::new_document(file.filename, SourceType::Upload, size)
            })
            .collect();
        state.documents.extend(created.iter().cloned());
        Ok(created)
    }

    async fn ingest_url(&self, url: &str) -> Result<Document, ApiError> {
        if url::Url::parse(url).is_err() {
            return Err(ApiError::Status {
                url: "/api/documents/url".into(),
                status: 400,
                body: format!("Failed to fetch URL: {}", url),
            });
        }
        let mut state = self.record("ingest_url");
        let document = Self::new_document(url.to_string(), SourceType::Url, 0);
        state.documents.push(document.clone());
        Ok(document)
    }

    async fn delete_document(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.record("delete_document");
        let before = state.documents.len();
        state.documents.retain(|d| d.id != id);
        if state.documents.len() == before {
            return Err(not_found("Document", id));
        }
        Ok(())
    }

    async fn list_connectors(&self) -> Result<Vec<Connector>, ApiError> {
        Ok(self.record("list_connectors").connectors.clone())
    }

    async fn create_connector(&self, request: &ConnectorCreate) -> Result<Connector, ApiError> {
        let mut state = self.record("create_connector");
        let connector = Connector {
            id: Uuid::new_v4().to_string(),
            name: request.name.clone(),
            connector_type: request.connector_type.clone(),
            status: ConnectorStatus::Disconnected,
            document_count: 0,
            last_synced: None,
            created_at: Some(now_iso()),
        };
        state.connectors.insert(0, connector.clone());
        Ok(connector)
    }

    async fn test_connector(&self, id: &str) -> Result<ConnectionTest, ApiError> {
        let mut state = self.record("test_connector");
        let connector = state
            .connectors
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("Connector", id))?;
        connector.status = ConnectorStatus::Connected;
        Ok(ConnectionTest {
            ok: true,
            message: format!("Connected to {}", connector.name),
        })
    }

    async fn sync_connector(&self, id: &str) -> Result<SyncAccepted, ApiError> {
        let mut state = self.record("sync_connector");
        let connector = state
            .connectors
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("Connector", id))?;
        connector.status = ConnectorStatus::Syncing;
        Ok(SyncAccepted {
            status: "sync_started".into(),
        })
    }

    async fn delete_connector(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.record("delete_connector");
        let before = state.connectors.len();
        state.connectors.retain(|c| c.id != id);
        if state.connectors.len() == before {
            return Err(not_found("Connector", id));
        }
        Ok(())
    }

    async fn get_settings(&self) -> Result<Settings, ApiError> {
        Ok(self.record("get_settings").settings.clone())
    }

    async fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings, ApiError> {
        let mut state = self.record("update_settings");
        let settings = &mut state.settings;
        if let Some(value) = &update.llm_provider {
            settings.llm_provider = value.clone();
        }
        if let Some(value) = &update.openai_model {
            settings.openai_model = value.clone();
        }
        if let Some(value) = &update.watsonx_model {
            settings.watsonx_model = value.clone();
        }
        if let Some(value) = update.chunk_size {
            settings.chunk_size = value;
        }
        if let Some(value) = update.chunk_overlap {
            settings.chunk_overlap = value;
        }
        if let Some(value) = update.retrieval_top_k {
            settings.retrieval_top_k = value;
        }
        if let Some(value) = update.rerank_top_k {
            settings.rerank_top_k = value;
        }
        if let Some(value) = update.bm25_weight {
            settings.bm25_weight = value;
        }
        if let Some(value) = update.vector_weight {
            settings.vector_weight = value;
        }
        Ok(settings.clone())
    }

    async fn health(&self) -> Result<Health, ApiError> {
        let _state = self.record("health");
        Ok(Health {
            status: "ok".into(),
        })
    }
}
