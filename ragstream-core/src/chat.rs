//! Chat stream protocol.
//!
//! A [`ChatTurn`] is the per-turn state machine
//! (`idle → awaiting_open → streaming → done`, terminal `failed`). It turns
//! server events into [`ViewUpdate`]s and rejects events that are invalid in
//! the current state. [`ChatClient`] runs turns over the
//! [`ConnectionManager`], one turn in flight per conversation.

use crate::connection::{ChannelHandle, ChannelHandler, ConnectionManager, StreamKey};
use crate::envelope::{self, ChatEvent, ChatRequest, Envelope};
use crate::error::StreamError;
use crate::projector::{ProjectorHandle, ViewUpdate};
use crate::types::{Message, Source};
use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatState {
    Idle,
    AwaitingOpen,
    Streaming,
    Done,
    Failed,
}

impl ChatState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChatState::Done | ChatState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChatState::Idle => "idle",
            ChatState::AwaitingOpen => "awaiting_open",
            ChatState::Streaming => "streaming",
            ChatState::Done => "done",
            ChatState::Failed => "failed",
        }
    }
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine for a single question/answer exchange.
#[derive(Debug)]
pub struct ChatTurn {
    conversation_id: String,
    state: watch::Sender<ChatState>,
    message_id: Option<String>,
    content: String,
    sources: Option<Vec<Source>>,
    failure: Option<String>,
}

impl ChatTurn {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ChatState::Idle);
        Self {
            conversation_id: conversation_id.into(),
            state,
            message_id: None,
            content: String::new(),
            sources: None,
            failure: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> ChatState {
        *self.state.borrow()
    }

    /// Observe state changes of this turn.
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    /// Id of the assistant placeholder, once the first token or sources arrived.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Answer text received so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sources(&self) -> Option<&[Source]> {
        self.sources.as_deref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn key(&self) -> String {
        StreamKey::chat(self.conversation_id.as_str()).to_string()
    }

    fn set_state(&mut self, next: ChatState) {
        debug!(conversation_id = %self.conversation_id, from = %self.state(), to = %next, "Chat turn transition");
        self.state.send_replace(next);
    }

    fn violation(&self, reason: impl Into<String>) -> StreamError {
        StreamError::ProtocolViolation {
            key: self.key(),
            reason: reason.into(),
        }
    }

    /// User send: `idle → awaiting_open`.
    ///
    /// Returns the frame to queue on the channel and the local echo of the
    /// user's message.
    pub fn begin(&mut self, text: impl Into<String>) -> Result<(ChatRequest, ViewUpdate), StreamError> {
        if self.state() != ChatState::Idle {
            return Err(StreamError::InvalidTransition {
                from: self.state().to_string(),
                to: ChatState::AwaitingOpen.to_string(),
            });
        }
        let text = text.into();
        self.set_state(ChatState::AwaitingOpen);
        let update = ViewUpdate::UserMessage {
            conversation_id: self.conversation_id.clone(),
            message: Message::user(text.clone()),
        };
        Ok((ChatRequest { message: text }, update))
    }

    /// Channel opened: `awaiting_open → streaming`.
    pub fn opened(&mut self) -> Result<(), StreamError> {
        if self.state() != ChatState::AwaitingOpen {
            return Err(StreamError::InvalidTransition {
                from: self.state().to_string(),
                to: ChatState::Streaming.to_string(),
            });
        }
        self.set_state(ChatState::Streaming);
        Ok(())
    }

    /// Apply one server event.
    ///
    /// Events after the turn ended and a second `sources` event are
    /// `ProtocolViolation`s and leave the turn unchanged.
    pub fn apply(&mut self, event: ChatEvent) -> Result<Vec<ViewUpdate>, StreamError> {
        match self.state() {
            ChatState::Streaming => {}
            state @ (ChatState::Done | ChatState::Failed) => {
                return Err(self.violation(format!("{} event after turn {}", event.kind(), state)));
            }
            state => {
                return Err(self.violation(format!("{} event while {}", event.kind(), state)));
            }
        }

        let mut updates = Vec::new();
        match event {
            ChatEvent::Token { content } => {
                let message_id = self.placeholder(&mut updates);
                self.content.push_str(&content);
                updates.push(ViewUpdate::TokenAppended {
                    conversation_id: self.conversation_id.clone(),
                    message_id,
                    content,
                });
            }
            ChatEvent::Sources { sources } => {
                if self.sources.is_some() {
                    return Err(self.violation("duplicate sources event"));
                }
                let message_id = self.placeholder(&mut updates);
                self.sources = Some(sources.clone());
                updates.push(ViewUpdate::SourcesAttached {
                    conversation_id: self.conversation_id.clone(),
                    message_id,
                    sources,
                });
            }
            ChatEvent::Done => {
                self.set_state(ChatState::Done);
                updates.push(ViewUpdate::TurnCompleted {
                    conversation_id: self.conversation_id.clone(),
                    message_id: self.message_id.clone(),
                });
            }
        }
        Ok(updates)
    }

    /// Move to `failed`, keeping whatever content arrived.
    ///
    /// Returns `None` if the turn had already ended.
    pub fn fail(&mut self, reason: impl Into<String>) -> Option<ViewUpdate> {
        if self.state().is_terminal() {
            return None;
        }
        let reason = reason.into();
        self.failure = Some(reason.clone());
        self.set_state(ChatState::Failed);
        Some(ViewUpdate::TurnFailed {
            conversation_id: self.conversation_id.clone(),
            message_id: self.message_id.clone(),
            reason,
        })
    }

    fn placeholder(&mut self, updates: &mut Vec<ViewUpdate>) -> String {
        match &self.message_id {
            Some(id) => id.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                self.message_id = Some(id.clone());
                updates.push(ViewUpdate::AssistantStarted {
                    conversation_id: self.conversation_id.clone(),
                    message_id: id.clone(),
                });
                id
            }
        }
    }
}

type SharedTurn = Arc<Mutex<ChatTurn>>;

fn lock_turn(turn: &SharedTurn) -> MutexGuard<'_, ChatTurn> {
    turn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives a [`ChatTurn`] from channel callbacks.
struct ChatTurnHandler {
    turn: SharedTurn,
    projector: ProjectorHandle,
}

impl ChatTurnHandler {
    fn fail(&mut self, reason: String) {
        let update = lock_turn(&self.turn).fail(reason);
        if let Some(update) = update {
            self.projector.submit(update);
        }
    }
}

impl ChannelHandler for ChatTurnHandler {
    fn on_open(&mut self) {
        if let Err(e) = lock_turn(&self.turn).opened() {
            warn!(error = %e, "Chat channel opened in unexpected state");
        }
    }

    fn on_event(&mut self, envelope: Envelope) -> ControlFlow<()> {
        let Envelope::Chat(event) = envelope else {
            warn!("Ignoring non-chat event on chat channel");
            return ControlFlow::Continue(());
        };

        let mut turn = lock_turn(&self.turn);
        match turn.apply(event) {
            Ok(updates) => {
                for update in updates {
                    self.projector.submit(update);
                }
            }
            Err(e) if e.is_recoverable() => warn!(error = %e, "Ignoring chat event"),
            Err(e) => {
                warn!(error = %e, "Chat event ended the turn");
                if let Some(update) = turn.fail(e.to_string()) {
                    self.projector.submit(update);
                }
                return ControlFlow::Break(());
            }
        }
        if turn.state() == ChatState::Done {
            info!(conversation_id = %turn.conversation_id(), "Chat turn completed");
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn on_error(&mut self, error: &StreamError) {
        self.fail(error.to_string());
    }

    fn on_close(&mut self) {
        self.fail("connection closed before the answer completed".to_string());
    }
}

/// Observes one turn started by [`ChatClient::send`].
#[derive(Debug, Clone)]
pub struct TurnHandle {
    conversation_id: String,
    state: watch::Receiver<ChatState>,
}

impl TurnHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> ChatState {
        *self.state.borrow()
    }

    /// Wait for the turn to end and return its terminal state.
    pub async fn finished(&mut self) -> ChatState {
        match self.state.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // The turn was dropped without ending.
            Err(_) => ChatState::Failed,
        }
    }
}

struct TurnEntry {
    channel: ChannelHandle,
    turn: SharedTurn,
}

/// Sends user messages and streams the answers into the projector.
#[derive(Clone)]
pub struct ChatClient {
    connections: ConnectionManager,
    projector: ProjectorHandle,
    turns: Arc<Mutex<HashMap<String, TurnEntry>>>,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(connections: ConnectionManager, projector: ProjectorHandle) -> Self {
        Self {
            connections,
            projector,
            turns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn turns(&self) -> MutexGuard<'_, HashMap<String, TurnEntry>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a turn: project the user message, open the conversation's chat
    /// channel and queue `{message}` for when it opens.
    pub async fn send(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
    ) -> Result<TurnHandle, StreamError> {
        let (channel, payload, handle) = {
            let mut turns = self.turns();
            if let Some(entry) = turns.get(conversation_id) {
                let previous = lock_turn(&entry.turn).state();
                if !previous.is_terminal() {
                    if self.connections.is_open(entry.channel.key()) {
                        return Err(StreamError::TurnInProgress {
                            conversation_id: conversation_id.to_string(),
                        });
                    }
                    // The channel ended without telling the turn.
                    warn!(%conversation_id, state = %previous, "Failing orphaned chat turn");
                    let update =
                        lock_turn(&entry.turn).fail("connection closed before the answer completed");
                    if let Some(update) = update {
                        self.projector.submit(update);
                    }
                }
                // Make sure the previous turn's channel is gone before reusing the key.
                self.connections.close(&entry.channel);
            }

            let mut turn = ChatTurn::new(conversation_id);
            let (request, user_message) = turn.begin(text)?;
            let payload = envelope::encode(&request)?;
            let handle = TurnHandle {
                conversation_id: conversation_id.to_string(),
                state: turn.subscribe(),
            };
            let turn = Arc::new(Mutex::new(turn));

            self.projector.submit(user_message);
            let channel = self.connections.open(
                StreamKey::chat(conversation_id),
                ChatTurnHandler {
                    turn: turn.clone(),
                    projector: self.projector.clone(),
                },
            );
            turns.insert(
                conversation_id.to_string(),
                TurnEntry {
                    channel: channel.clone(),
                    turn,
                },
            );
            (channel, payload, handle)
        };

        info!(%conversation_id, "Sending chat message");
        if let Err(e) = self.connections.send(&channel, payload).await {
            // The channel already ended; its handler has failed the turn.
            debug!(%conversation_id, error = %e, "Chat message not queued");
        }
        Ok(handle)
    }

    /// Cancel the in-flight turn of a conversation.
    ///
    /// The channel is closed and the turn fails with its partial content.
    /// Returns `false` when no turn was in flight.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let entry = self.turns().remove(conversation_id);
        let Some(entry) = entry else {
            return false;
        };
        self.connections.close(&entry.channel);
        let update = lock_turn(&entry.turn).fail("cancelled");
        match update {
            Some(update) => {
                info!(%conversation_id, "Chat turn cancelled");
                self.projector.submit(update);
                true
            }
            None => false,
        }
    }

    /// Fail every turn still in flight and close its channel.
    ///
    /// Returns the number of turns that were failed.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let entries: Vec<(String, TurnEntry)> = self.turns().drain().collect();
        let mut failed = 0;
        for (conversation_id, entry) in entries {
            self.connections.close(&entry.channel);
            let update = lock_turn(&entry.turn).fail(reason);
            if let Some(update) = update {
                debug!(%conversation_id, reason, "Chat turn failed");
                self.projector.submit(update);
                failed += 1;
            }
        }
        failed
    }

    /// State of the latest turn of a conversation.
    pub fn turn_state(&self, conversation_id: &str) -> Option<ChatState> {
        self.turns()
            .get(conversation_id)
            .map(|entry| lock_turn(&entry.turn).state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn streaming_turn() -> ChatTurn {
        let mut turn = ChatTurn::new("c1");
        turn.begin("What is RAG?").unwrap();
        turn.opened().unwrap();
        turn
    }

    fn source(name: &str) -> Source {
        Source {
            doc_name: name.into(),
            page: Some(1),
            chunk_text: "chunk".into(),
            relevance_score: 0.8,
        }
    }

    #[test]
    fn test_begin_only_from_idle() {
        let mut turn = ChatTurn::new("c1");
        let (request, update) = turn.begin("hello").unwrap();
        assert_eq!(request.message, "hello");
        assert!(matches!(update, ViewUpdate::UserMessage { .. }));
        assert_eq!(turn.state(), ChatState::AwaitingOpen);

        let err = turn.begin("again").unwrap_err();
        assert!(matches!(err, StreamError::InvalidTransition { .. }));
    }

    #[test]
    fn test_first_token_creates_placeholder() {
        let mut turn = streaming_turn();
        let updates = turn.apply(ChatEvent::token("Retrieval")).unwrap();
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0], ViewUpdate::AssistantStarted { .. }));

        let updates = turn.apply(ChatEvent::token("-Augmented")).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(turn.content(), "Retrieval-Augmented");
    }

    #[test]
    fn test_sources_before_tokens_creates_placeholder() {
        let mut turn = streaming_turn();
        let updates = turn
            .apply(ChatEvent::Sources {
                sources: vec![source("a.pdf")],
            })
            .unwrap();
        assert!(matches!(updates[0], ViewUpdate::AssistantStarted { .. }));
        let id = turn.message_id().unwrap().to_string();

        turn.apply(ChatEvent::token("x")).unwrap();
        assert_eq!(turn.message_id(), Some(id.as_str()));
    }

    #[test]
    fn test_duplicate_sources_rejected() {
        let mut turn = streaming_turn();
        turn.apply(ChatEvent::Sources {
            sources: vec![source("a.pdf")],
        })
        .unwrap();
        let err = turn
            .apply(ChatEvent::Sources {
                sources: vec![source("b.pdf")],
            })
            .unwrap_err();
        assert!(matches!(err, StreamError::ProtocolViolation { .. }));
        assert_eq!(turn.sources().unwrap()[0].doc_name, "a.pdf");
        assert_eq!(turn.state(), ChatState::Streaming);
    }

    #[test]
    fn test_nothing_accepted_after_done() {
        let mut turn = streaming_turn();
        turn.apply(ChatEvent::token("a")).unwrap();
        let updates = turn.apply(ChatEvent::Done).unwrap();
        assert!(matches!(updates[0], ViewUpdate::TurnCompleted { .. }));
        assert_eq!(turn.state(), ChatState::Done);

        assert!(turn.apply(ChatEvent::token("b")).is_err());
        assert!(turn.apply(ChatEvent::Done).is_err());
        assert_eq!(turn.content(), "a");
        // A finished turn cannot fail.
        assert!(turn.fail("late").is_none());
    }

    #[test]
    fn test_fail_keeps_partial_content() {
        let mut turn = streaming_turn();
        turn.apply(ChatEvent::token("Partial")).unwrap();
        let update = turn.fail("connection reset").unwrap();
        match update {
            ViewUpdate::TurnFailed {
                message_id, reason, ..
            } => {
                assert!(message_id.is_some());
                assert_eq!(reason, "connection reset");
            }
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(turn.state(), ChatState::Failed);
        assert_eq!(turn.content(), "Partial");
        assert!(turn.apply(ChatEvent::token("more")).is_err());
    }

    #[test]
    fn test_events_before_open_rejected() {
        let mut turn = ChatTurn::new("c1");
        turn.begin("q").unwrap();
        assert!(turn.apply(ChatEvent::token("early")).is_err());
        assert_eq!(turn.content(), "");
    }

    #[tokio::test]
    async fn test_handler_skips_rejected_events_and_keeps_streaming() {
        let turn = Arc::new(Mutex::new(streaming_turn()));
        let mut handler = ChatTurnHandler {
            turn: turn.clone(),
            projector: crate::projector::StateProjector::spawn(),
        };
        let sources = || Envelope::Chat(ChatEvent::Sources {
            sources: vec![source("a.pdf")],
        });

        assert!(handler.on_event(sources()).is_continue());
        // Duplicate sources are a protocol violation, not a reason to end the turn.
        assert!(handler.on_event(sources()).is_continue());
        assert_eq!(lock_turn(&turn).state(), ChatState::Streaming);

        assert!(handler.on_event(Envelope::Chat(ChatEvent::token("ok"))).is_continue());
        assert!(handler.on_event(Envelope::Chat(ChatEvent::Done)).is_break());
        assert_eq!(lock_turn(&turn).content(), "ok");
        assert_eq!(lock_turn(&turn).sources().map(<[Source]>::len), Some(1));
    }

    #[test]
    fn test_state_subscription() {
        let mut turn = ChatTurn::new("c1");
        let rx = turn.subscribe();
        turn.begin("q").unwrap();
        turn.opened().unwrap();
        assert_eq!(*rx.borrow(), ChatState::Streaming);
        turn.fail("cancelled");
        assert_eq!(*rx.borrow(), ChatState::Failed);
    }
}
