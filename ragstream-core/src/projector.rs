//! Client state projection.
//!
//! Every producer (chat turns, ingestion channels, polling, REST refreshes)
//! describes what happened as a [`ViewUpdate`] and submits it through a
//! [`ProjectorHandle`]. A single projector task folds the updates into the
//! [`ViewModel`] held by a `watch` channel, so it is the only writer and
//! readers always see a consistent snapshot.

use crate::types::{
    Connector, ConnectorStatus, Conversation, ConversationDetail, Document, DocumentStatus,
    Message, MessageState, Role, Settings, Source,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// One change to apply to the view model.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    ConversationsLoaded(Vec<Conversation>),
    ConversationLoaded(ConversationDetail),
    ConversationRemoved {
        id: String,
    },
    UserMessage {
        conversation_id: String,
        message: Message,
    },
    AssistantStarted {
        conversation_id: String,
        message_id: String,
    },
    TokenAppended {
        conversation_id: String,
        message_id: String,
        content: String,
    },
    SourcesAttached {
        conversation_id: String,
        message_id: String,
        sources: Vec<Source>,
    },
    TurnCompleted {
        conversation_id: String,
        message_id: Option<String>,
    },
    TurnFailed {
        conversation_id: String,
        message_id: Option<String>,
        reason: String,
    },
    DocumentsLoaded(Vec<Document>),
    DocumentAdded(Document),
    DocumentStatusChanged {
        document_id: String,
        status: DocumentStatus,
        progress: Option<u8>,
        error_message: Option<String>,
    },
    /// Polling stopped before the document reached a terminal status.
    DocumentPollAbandoned {
        document_id: String,
    },
    DocumentRemoved {
        id: String,
    },
    ConnectorsLoaded(Vec<Connector>),
    ConnectorSyncStarted {
        id: String,
    },
    ConnectorRemoved {
        id: String,
    },
    SettingsLoaded(Settings),
}

/// Render-ready state of one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    /// A turn is streaming; input should be disabled.
    pub turn_in_flight: bool,
    /// Reason the last turn failed, shown next to the partial answer.
    pub last_error: Option<String>,
}

impl ConversationView {
    fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            messages: Vec::new(),
            turn_in_flight: false,
            last_error: None,
        }
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewModel {
    pub conversations: Vec<ConversationView>,
    pub documents: Vec<Document>,
    pub connectors: Vec<Connector>,
    pub settings: Option<Settings>,
    /// Unfinished documents nobody is tracking any more.
    pub abandoned_documents: Vec<String>,
    /// Incremented on every applied update.
    pub version: u64,
}

impl ViewModel {
    pub fn conversation(&self, id: &str) -> Option<&ConversationView> {
        self.conversations.iter().find(|c| c.conversation.id == id)
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn is_abandoned(&self, document_id: &str) -> bool {
        self.abandoned_documents.iter().any(|id| id == document_id)
    }

    pub fn connector(&self, id: &str) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id == id)
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut ConversationView> {
        self.conversations
            .iter_mut()
            .find(|c| c.conversation.id == id)
    }

    fn conversation_entry(&mut self, id: &str) -> &mut ConversationView {
        let index = match self
            .conversations
            .iter()
            .position(|c| c.conversation.id == id)
        {
            Some(index) => index,
            None => {
                self.conversations
                    .push(ConversationView::new(Conversation::untitled(id)));
                self.conversations.len() - 1
            }
        };
        &mut self.conversations[index]
    }

    /// Fold one update into the model.
    pub fn apply(&mut self, update: ViewUpdate) {
        self.version += 1;
        match update {
            ViewUpdate::ConversationsLoaded(list) => self.load_conversations(list),
            ViewUpdate::ConversationLoaded(detail) => self.load_conversation(detail),
            ViewUpdate::ConversationRemoved { id } => {
                self.conversations.retain(|c| c.conversation.id != id);
            }
            ViewUpdate::UserMessage {
                conversation_id,
                message,
            } => {
                let view = self.conversation_entry(&conversation_id);
                view.messages.push(message);
                view.turn_in_flight = true;
                view.last_error = None;
            }
            ViewUpdate::AssistantStarted {
                conversation_id,
                message_id,
            } => {
                let view = self.conversation_entry(&conversation_id);
                if view.message_mut(&message_id).is_none() {
                    view.messages
                        .push(Message::assistant_placeholder(message_id));
                }
            }
            ViewUpdate::TokenAppended {
                conversation_id,
                message_id,
                content,
            } => match self.streaming_message(&conversation_id, &message_id) {
                Some(message) => message.content.push_str(&content),
                None => warn!(%conversation_id, %message_id, "Token for a frozen or unknown message"),
            },
            ViewUpdate::SourcesAttached {
                conversation_id,
                message_id,
                sources,
            } => match self.streaming_message(&conversation_id, &message_id) {
                Some(message) if message.sources.is_none() => message.sources = Some(sources),
                Some(_) => warn!(%conversation_id, %message_id, "Sources already attached"),
                None => warn!(%conversation_id, %message_id, "Sources for a frozen or unknown message"),
            },
            ViewUpdate::TurnCompleted {
                conversation_id,
                message_id,
            } => {
                if let Some(view) = self.conversation_mut(&conversation_id) {
                    if let Some(id) = message_id
                        && let Some(message) = view.message_mut(&id)
                        && message.is_streaming()
                    {
                        message.state = MessageState::Complete;
                    }
                    view.turn_in_flight = false;
                }
            }
            ViewUpdate::TurnFailed {
                conversation_id,
                message_id,
                reason,
            } => {
                if let Some(view) = self.conversation_mut(&conversation_id) {
                    if let Some(id) = message_id
                        && let Some(message) = view.message_mut(&id)
                        && message.is_streaming()
                    {
                        message.state = MessageState::Failed {
                            reason: reason.clone(),
                        };
                    }
                    view.turn_in_flight = false;
                    view.last_error = Some(reason);
                }
            }
            ViewUpdate::DocumentsLoaded(list) => self.load_documents(list),
            ViewUpdate::DocumentAdded(document) => {
                let document = normalize_document(document);
                self.abandoned_documents.retain(|id| *id != document.id);
                match self.documents.iter_mut().find(|d| d.id == document.id) {
                    Some(existing) => *existing = document,
                    None => self.documents.insert(0, document),
                }
            }
            ViewUpdate::DocumentStatusChanged {
                document_id,
                status,
                progress,
                error_message,
            } => match self.documents.iter_mut().find(|d| d.id == document_id) {
                Some(document) if document.status.is_terminal() => {
                    debug!(%document_id, "Ignoring update for finished document");
                }
                Some(document) if status.rank() < document.status.rank() => {
                    debug!(%document_id, from = %document.status, to = %status, "Ignoring stale document status");
                }
                Some(document)
                    if status == document.status
                        && progress.unwrap_or(0) <= document.progress.unwrap_or(0) =>
                {
                    debug!(%document_id, ?progress, "Ignoring stale document progress");
                }
                Some(document) => {
                    document.status = status;
                    document.progress = if status.is_terminal() {
                        None
                    } else {
                        progress
                    };
                    if status == DocumentStatus::Failed {
                        document.error_message = error_message;
                    }
                    self.abandoned_documents.retain(|id| *id != document_id);
                }
                None => debug!(%document_id, "Status for unknown document"),
            },
            ViewUpdate::DocumentPollAbandoned { document_id } => {
                let unsettled = self
                    .document(&document_id)
                    .is_some_and(|d| !d.status.is_terminal());
                if unsettled && !self.abandoned_documents.contains(&document_id) {
                    self.abandoned_documents.push(document_id);
                }
            }
            ViewUpdate::DocumentRemoved { id } => {
                self.documents.retain(|d| d.id != id);
                self.abandoned_documents.retain(|d| *d != id);
            }
            ViewUpdate::ConnectorsLoaded(list) => self.load_connectors(list),
            ViewUpdate::ConnectorSyncStarted { id } => {
                match self.connectors.iter_mut().find(|c| c.id == id) {
                    Some(connector) => connector.status = ConnectorStatus::Syncing,
                    None => debug!(connector_id = %id, "Sync started for unknown connector"),
                }
            }
            ViewUpdate::ConnectorRemoved { id } => self.connectors.retain(|c| c.id != id),
            ViewUpdate::SettingsLoaded(settings) => self.settings = Some(settings),
        }
    }

    fn streaming_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
    ) -> Option<&mut Message> {
        self.conversation_mut(conversation_id)?
            .message_mut(message_id)
            .filter(|m| m.is_streaming())
    }

    fn load_conversations(&mut self, list: Vec<Conversation>) {
        let mut next = Vec::with_capacity(list.len());
        for conversation in list {
            let view = match self
                .conversations
                .iter()
                .position(|c| c.conversation.id == conversation.id)
            {
                Some(index) => {
                    let mut view = self.conversations.swap_remove(index);
                    view.conversation = conversation;
                    view
                }
                None => ConversationView::new(conversation),
            };
            next.push(view);
        }
        // Keep conversations with a live turn even if the server has not listed them yet.
        next.extend(self.conversations.drain(..).filter(|c| c.turn_in_flight));
        self.conversations = next;
    }

    /// Replace a conversation's messages with the server's copy, keeping
    /// the local answer the server does not know about yet (a streaming or
    /// failed assistant message).
    fn load_conversation(&mut self, detail: ConversationDetail) {
        let summary = detail.summary();
        let view = self.conversation_entry(&summary.id);
        let local_only: Vec<Message> = view
            .messages
            .drain(..)
            .filter(|local| !detail.messages.iter().any(|m| m.id == local.id))
            .filter(|local| {
                local.role == Role::Assistant && (local.is_streaming() || local.is_failed())
            })
            .collect();
        view.conversation = summary;
        view.messages = detail.messages;
        view.messages.extend(local_only);
    }

    fn load_documents(&mut self, list: Vec<Document>) {
        let mut next = Vec::with_capacity(list.len());
        for incoming in list {
            let incoming = normalize_document(incoming);
            let merged = match self.documents.iter().find(|d| d.id == incoming.id) {
                // A finished document stays finished.
                Some(local) if local.status.is_terminal() && !incoming.status.is_terminal() => {
                    local.clone()
                }
                // Push updates may be ahead of the list endpoint.
                Some(local) if local.status.rank() > incoming.status.rank() => local.clone(),
                Some(local)
                    if local.status == incoming.status
                        && local.progress.unwrap_or(0) > incoming.progress.unwrap_or(0) =>
                {
                    Document {
                        progress: local.progress,
                        ..incoming
                    }
                }
                _ => incoming,
            };
            next.push(merged);
        }
        self.documents = next;
        let documents = &self.documents;
        self.abandoned_documents.retain(|id| {
            documents
                .iter()
                .any(|d| d.id == *id && !d.status.is_terminal())
        });
    }

    fn load_connectors(&mut self, list: Vec<Connector>) {
        self.connectors = list
            .into_iter()
            .map(|mut incoming| {
                let syncing_locally = self
                    .connectors
                    .iter()
                    .any(|c| c.id == incoming.id && c.status == ConnectorStatus::Syncing);
                // Only a server-reported terminal status ends a sync.
                if syncing_locally && !incoming.status.ends_sync() {
                    incoming.status = ConnectorStatus::Syncing;
                }
                incoming
            })
            .collect();
    }
}

fn normalize_document(mut document: Document) -> Document {
    if document.status.is_terminal() {
        document.progress = None;
    }
    if document.status != DocumentStatus::Failed {
        document.error_message = None;
    }
    document
}

/// Cloneable entry point for submitting updates and reading snapshots.
#[derive(Debug, Clone)]
pub struct ProjectorHandle {
    updates: mpsc::UnboundedSender<ViewUpdate>,
    view: watch::Receiver<ViewModel>,
}

impl ProjectorHandle {
    /// Queue an update. Returns `false` once the projector has stopped.
    pub fn submit(&self, update: ViewUpdate) -> bool {
        self.updates.send(update).is_ok()
    }

    /// A copy of the current view model.
    pub fn snapshot(&self) -> ViewModel {
        self.view.borrow().clone()
    }

    /// Subscribe to view-model changes.
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view.clone()
    }

    /// Wait until the view satisfies `predicate` and return that snapshot.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&ViewModel) -> bool) -> Option<ViewModel> {
        let mut view = self.view.clone();
        let model = view.wait_for(|model| predicate(model)).await.ok()?.clone();
        Some(model)
    }
}

/// The single writer of the view model.
pub struct StateProjector {
    updates: mpsc::UnboundedReceiver<ViewUpdate>,
    view: watch::Sender<ViewModel>,
}

impl StateProjector {
    pub fn new(initial: ViewModel) -> (StateProjector, ProjectorHandle) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(initial);
        (
            StateProjector {
                updates: update_rx,
                view: view_tx,
            },
            ProjectorHandle {
                updates: update_tx,
                view: view_rx,
            },
        )
    }

    /// Start a projector task with an empty view model.
    pub fn spawn() -> ProjectorHandle {
        let (projector, handle) = StateProjector::new(ViewModel::default());
        tokio::spawn(projector.run());
        handle
    }

    /// Apply updates until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(update) = self.updates.recv().await {
            self.view.send_modify(|model| model.apply(update));
        }
        debug!("State projector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectorType;
    use pretty_assertions::assert_eq;

    fn doc(id: &str, status: DocumentStatus, progress: Option<u8>) -> Document {
        Document {
            id: id.into(),
            filename: format!("{}.pdf", id),
            source_type: None,
            file_type: None,
            status,
            progress,
            error_message: None,
            file_size: Some(1024),
            chunk_count: None,
            created_at: None,
        }
    }

    fn connector(id: &str, status: ConnectorStatus) -> Connector {
        Connector {
            id: id.into(),
            name: "Wiki".into(),
            connector_type: ConnectorType::Confluence,
            status,
            document_count: 0,
            last_synced: None,
            created_at: None,
        }
    }

    fn start_turn(model: &mut ViewModel) {
        model.apply(ViewUpdate::UserMessage {
            conversation_id: "c1".into(),
            message: Message::user("hi"),
        });
        model.apply(ViewUpdate::AssistantStarted {
            conversation_id: "c1".into(),
            message_id: "a1".into(),
        });
    }

    #[test]
    fn test_tokens_append_until_completed() {
        let mut model = ViewModel::default();
        start_turn(&mut model);
        for part in ["Hel", "lo"] {
            model.apply(ViewUpdate::TokenAppended {
                conversation_id: "c1".into(),
                message_id: "a1".into(),
                content: part.into(),
            });
        }
        model.apply(ViewUpdate::TurnCompleted {
            conversation_id: "c1".into(),
            message_id: Some("a1".into()),
        });
        // Frozen: later tokens are ignored.
        model.apply(ViewUpdate::TokenAppended {
            conversation_id: "c1".into(),
            message_id: "a1".into(),
            content: "!!".into(),
        });

        let view = model.conversation("c1").unwrap();
        let answer = view.last_message().unwrap();
        assert_eq!(answer.role, Role::Assistant);
        assert_eq!(answer.content, "Hello");
        assert_eq!(answer.state, MessageState::Complete);
        assert!(!view.turn_in_flight);
    }

    #[test]
    fn test_failed_turn_keeps_partial_content() {
        let mut model = ViewModel::default();
        start_turn(&mut model);
        model.apply(ViewUpdate::TokenAppended {
            conversation_id: "c1".into(),
            message_id: "a1".into(),
            content: "Partial".into(),
        });
        model.apply(ViewUpdate::TurnFailed {
            conversation_id: "c1".into(),
            message_id: Some("a1".into()),
            reason: "connection reset".into(),
        });

        let view = model.conversation("c1").unwrap();
        let answer = view.last_message().unwrap();
        assert_eq!(answer.content, "Partial");
        assert!(answer.is_failed());
        assert_eq!(view.last_error.as_deref(), Some("connection reset"));
        assert!(!view.turn_in_flight);
    }

    #[test]
    fn test_sources_attached_once() {
        let mut model = ViewModel::default();
        start_turn(&mut model);
        let source = |name: &str| Source {
            doc_name: name.into(),
            page: None,
            chunk_text: "...".into(),
            relevance_score: 0.5,
        };
        model.apply(ViewUpdate::SourcesAttached {
            conversation_id: "c1".into(),
            message_id: "a1".into(),
            sources: vec![source("a.pdf")],
        });
        model.apply(ViewUpdate::SourcesAttached {
            conversation_id: "c1".into(),
            message_id: "a1".into(),
            sources: vec![source("b.pdf"), source("c.pdf")],
        });
        let answer = model.conversation("c1").unwrap().last_message().unwrap();
        assert_eq!(answer.sources.as_ref().unwrap().len(), 1);
        assert_eq!(answer.sources.as_ref().unwrap()[0].doc_name, "a.pdf");
    }

    #[test]
    fn test_conversation_reload_keeps_streaming_answer() {
        let mut model = ViewModel::default();
        start_turn(&mut model);
        model.apply(ViewUpdate::TokenAppended {
            conversation_id: "c1".into(),
            message_id: "a1".into(),
            content: "Stream".into(),
        });

        let mut persisted_user = Message::user("hi");
        persisted_user.id = "u-server".into();
        model.apply(ViewUpdate::ConversationLoaded(ConversationDetail {
            id: "c1".into(),
            title: "Greeting".into(),
            messages: vec![persisted_user],
            created_at: "2024-01-01T00:00:00".into(),
            updated_at: "2024-01-01T00:00:00".into(),
        }));

        let view = model.conversation("c1").unwrap();
        assert_eq!(view.conversation.title, "Greeting");
        let last = view.last_message().unwrap();
        assert_eq!(last.id, "a1");
        assert_eq!(last.content, "Stream");
        assert!(last.is_streaming());
    }

    #[test]
    fn test_document_terminal_is_idempotent() {
        let mut model = ViewModel::default();
        model.apply(ViewUpdate::DocumentsLoaded(vec![doc(
            "d1",
            DocumentStatus::Processing,
            Some(10),
        )]));
        model.apply(ViewUpdate::DocumentStatusChanged {
            document_id: "d1".into(),
            status: DocumentStatus::Completed,
            progress: Some(100),
            error_message: None,
        });
        model.apply(ViewUpdate::DocumentStatusChanged {
            document_id: "d1".into(),
            status: DocumentStatus::Processing,
            progress: Some(20),
            error_message: None,
        });
        let d1 = model.document("d1").unwrap();
        assert_eq!(d1.status, DocumentStatus::Completed);
        assert_eq!(d1.progress, None);
    }

    #[test]
    fn test_document_failure_message() {
        let mut model = ViewModel::default();
        model.apply(ViewUpdate::DocumentAdded(doc(
            "d1",
            DocumentStatus::Pending,
            None,
        )));
        model.apply(ViewUpdate::DocumentStatusChanged {
            document_id: "d1".into(),
            status: DocumentStatus::Failed,
            progress: None,
            error_message: Some("unsupported file type".into()),
        });
        let d1 = model.document("d1").unwrap();
        assert_eq!(d1.error_message.as_deref(), Some("unsupported file type"));
        assert_eq!(d1.visible_progress(), None);
    }

    #[test]
    fn test_document_refresh_does_not_regress() {
        let mut model = ViewModel::default();
        model.apply(ViewUpdate::DocumentsLoaded(vec![
            doc("d1", DocumentStatus::Processing, Some(60)),
            doc("d2", DocumentStatus::Completed, None),
        ]));
        // A stale list: d1 behind the pushed progress, d2 reported as pending.
        model.apply(ViewUpdate::DocumentsLoaded(vec![
            doc("d1", DocumentStatus::Processing, Some(20)),
            doc("d2", DocumentStatus::Pending, None),
            doc("d3", DocumentStatus::Pending, None),
        ]));
        assert_eq!(model.document("d1").unwrap().progress, Some(60));
        assert_eq!(
            model.document("d2").unwrap().status,
            DocumentStatus::Completed
        );
        assert_eq!(model.documents.len(), 3);
    }

    #[test]
    fn test_document_status_changes_only_move_forward() {
        let mut model = ViewModel::default();
        model.apply(ViewUpdate::DocumentAdded(doc(
            "d1",
            DocumentStatus::Processing,
            Some(60),
        )));
        // A second producer lagging behind the first.
        model.apply(ViewUpdate::DocumentStatusChanged {
            document_id: "d1".into(),
            status: DocumentStatus::Processing,
            progress: Some(40),
            error_message: None,
        });
        model.apply(ViewUpdate::DocumentStatusChanged {
            document_id: "d1".into(),
            status: DocumentStatus::Pending,
            progress: Some(5),
            error_message: None,
        });
        let d1 = model.document("d1").unwrap();
        assert_eq!(d1.status, DocumentStatus::Processing);
        assert_eq!(d1.progress, Some(60));

        model.apply(ViewUpdate::DocumentStatusChanged {
            document_id: "d1".into(),
            status: DocumentStatus::Processing,
            progress: Some(75),
            error_message: None,
        });
        assert_eq!(model.document("d1").unwrap().progress, Some(75));
    }

    #[test]
    fn test_abandoned_poll_is_visible_until_document_moves() {
        let mut model = ViewModel::default();
        model.apply(ViewUpdate::DocumentsLoaded(vec![
            doc("d1", DocumentStatus::Pending, None),
            doc("d2", DocumentStatus::Completed, None),
        ]));
        model.apply(ViewUpdate::DocumentPollAbandoned {
            document_id: "d1".into(),
        });
        model.apply(ViewUpdate::DocumentPollAbandoned {
            document_id: "d2".into(),
        });
        assert!(model.is_abandoned("d1"));
        assert!(!model.is_abandoned("d2"));
        assert_eq!(model.abandoned_documents.len(), 1);

        model.apply(ViewUpdate::DocumentStatusChanged {
            document_id: "d1".into(),
            status: DocumentStatus::Processing,
            progress: Some(10),
            error_message: None,
        });
        assert!(!model.is_abandoned("d1"));
    }

    #[test]
    fn test_reload_mid_turn_does_not_duplicate_user_message() {
        let mut model = ViewModel::default();
        start_turn(&mut model);

        let mut persisted_user = Message::user("hi");
        persisted_user.id = "u-server".into();
        model.apply(ViewUpdate::ConversationLoaded(ConversationDetail {
            id: "c1".into(),
            title: "Greeting".into(),
            messages: vec![persisted_user],
            created_at: "2024-01-01T00:00:00".into(),
            updated_at: "2024-01-01T00:00:00".into(),
        }));

        let view = model.conversation("c1").unwrap();
        let roles: Vec<Role> = view.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(view.messages[0].id, "u-server");
        assert!(view.turn_in_flight);
    }

    #[test]
    fn test_connector_stays_syncing_until_server_reports_end() {
        let mut model = ViewModel::default();
        model.apply(ViewUpdate::ConnectorsLoaded(vec![connector(
            "c1",
            ConnectorStatus::Connected,
        )]));
        model.apply(ViewUpdate::ConnectorSyncStarted { id: "c1".into() });
        assert_eq!(
            model.connector("c1").unwrap().status,
            ConnectorStatus::Syncing
        );

        model.apply(ViewUpdate::ConnectorsLoaded(vec![connector(
            "c1",
            ConnectorStatus::Disconnected,
        )]));
        assert_eq!(
            model.connector("c1").unwrap().status,
            ConnectorStatus::Syncing
        );

        model.apply(ViewUpdate::ConnectorsLoaded(vec![connector(
            "c1",
            ConnectorStatus::Error,
        )]));
        assert_eq!(model.connector("c1").unwrap().status, ConnectorStatus::Error);
    }

    #[tokio::test]
    async fn test_projector_task_publishes_snapshots() {
        let handle = StateProjector::spawn();
        assert!(handle.submit(ViewUpdate::ConnectorsLoaded(vec![connector(
            "c1",
            ConnectorStatus::Connected
        )])));
        let model = handle
            .wait_for(|m| m.connector("c1").is_some())
            .await
            .unwrap();
        assert_eq!(model.version, 1);
        assert_eq!(handle.snapshot().connectors.len(), 1);
    }
}
