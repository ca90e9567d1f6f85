//! Wiring of the streaming layer, the REST client and the projector.

use crate::api::{BackendApi, HttpBackend};
use crate::chat::ChatClient;
use crate::config::ClientConfig;
use crate::connection::{ChannelOptions, ConnectionManager};
use crate::connectors::ConnectorSyncCoordinator;
use crate::error::{ApiError, RagstreamError};
use crate::ingestion::{IngestionWatcher, PollPolicy};
use crate::projector::{ProjectorHandle, StateProjector, ViewUpdate};
use crate::transport::{Transport, WsTransport};
use crate::types::{
    ChatPrompt, ChatReply, Conversation, ConversationDetail, Settings, SettingsUpdate,
};
use std::sync::Arc;
use tracing::info;

/// One client session against a backend.
///
/// Must be created inside a Tokio runtime: the projector task is spawned on
/// construction.
#[derive(Clone)]
pub struct RagClient {
    config: ClientConfig,
    api: Arc<dyn BackendApi>,
    connections: ConnectionManager,
    projector: ProjectorHandle,
    chat: ChatClient,
    ingestion: IngestionWatcher,
    connectors: ConnectorSyncCoordinator,
}

impl std::fmt::Debug for RagClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagClient")
            .field("config", &self.config)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl RagClient {
    /// Connect to the server named by `config` over HTTP and WebSocket.
    pub fn connect(config: ClientConfig) -> Result<Self, RagstreamError> {
        config.validate()?;
        let api = Arc::new(HttpBackend::new(&config.server)?);
        let transport = Arc::new(WsTransport::new(
            config.server.ws_url.clone(),
            config.channel_buffer,
        ));
        info!(api_url = %config.server.api_url, ws_url = %config.server.ws_url, "Client configured");
        Ok(Self::with_parts(config, api, transport))
    }

    /// Build a client over explicit backend and transport implementations.
    pub fn with_parts(
        config: ClientConfig,
        api: Arc<dyn BackendApi>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let projector = StateProjector::spawn();
        let connections = ConnectionManager::new(transport, ChannelOptions::from_config(&config));
        let chat = ChatClient::new(connections.clone(), projector.clone());
        let ingestion = IngestionWatcher::new(
            connections.clone(),
            api.clone(),
            projector.clone(),
            PollPolicy::from_config(&config.ingestion),
        );
        let connectors = ConnectorSyncCoordinator::new(
            api.clone(),
            projector.clone(),
            config.connectors.sync_refresh_delay(),
        );
        Self {
            config,
            api,
            connections,
            projector,
            chat,
            ingestion,
            connectors,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<dyn BackendApi> {
        &self.api
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn projector(&self) -> &ProjectorHandle {
        &self.projector
    }

    pub fn chat(&self) -> &ChatClient {
        &self.chat
    }

    pub fn ingestion(&self) -> &IngestionWatcher {
        &self.ingestion
    }

    pub fn connectors(&self) -> &ConnectorSyncCoordinator {
        &self.connectors
    }

    pub async fn load_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let conversations = self.api.list_conversations().await?;
        self.projector
            .submit(ViewUpdate::ConversationsLoaded(conversations.clone()));
        Ok(conversations)
    }

    pub async fn open_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError> {
        let detail = self.api.get_conversation(id).await?;
        self.projector
            .submit(ViewUpdate::ConversationLoaded(detail.clone()));
        Ok(detail)
    }

    pub async fn create_conversation(&self, title: &str) -> Result<Conversation, ApiError> {
        let conversation = self.api.create_conversation(title).await?;
        self.load_conversations().await?;
        Ok(conversation)
    }

    /// Ask a question without streaming. The persisted exchange is loaded
    /// into the view once the answer is back.
    pub async fn send_message(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, ApiError> {
        let prompt = ChatPrompt {
            message: message.to_string(),
            conversation_id: conversation_id.map(str::to_string),
        };
        let reply = self.api.send_message(&prompt).await?;
        if conversation_id.is_none() {
            self.load_conversations().await?;
        }
        self.open_conversation(&reply.conversation_id).await?;
        Ok(reply)
    }

    /// Delete a conversation, cancelling its in-flight turn first.
    pub async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.chat.cancel(id);
        self.api.delete_conversation(id).await?;
        self.projector
            .submit(ViewUpdate::ConversationRemoved { id: id.to_string() });
        Ok(())
    }

    pub async fn load_settings(&self) -> Result<Settings, ApiError> {
        let settings = self.api.get_settings().await?;
        self.projector
            .submit(ViewUpdate::SettingsLoaded(settings.clone()));
        Ok(settings)
    }

    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings, ApiError> {
        let settings = self.api.update_settings(update).await?;
        self.projector
            .submit(ViewUpdate::SettingsLoaded(settings.clone()));
        Ok(settings)
    }

    /// Fail in-flight chat turns and close every live channel. Returns how
    /// many channels were still live.
    pub fn shutdown(&self) -> usize {
        let live = self.connections.live_count();
        let failed_turns = self.chat.cancel_all("client shut down");
        self.connections.close_all();
        info!(closed = live, failed_turns, "Client shut down");
        live
    }
}
