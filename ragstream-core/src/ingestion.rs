//! Ingestion status protocol.
//!
//! Documents move `pending → processing(0..100) → completed | failed`. A
//! [`DocumentTracker`] enforces that order for one document; the
//! [`IngestionWatcher`] subscribes to the ingestion channel of every
//! in-flight document and falls back to bounded polling of the document list
//! when a channel drops before the document finished.

use crate::api::{BackendApi, UploadFile};
use crate::config::IngestionConfig;
use crate::connection::{ChannelHandle, ChannelHandler, ConnectionManager, StreamKey};
use crate::envelope::{Envelope, IngestionEvent};
use crate::error::{ApiError, StreamError};
use crate::projector::{ProjectorHandle, ViewUpdate};
use crate::types::{Document, DocumentStatus};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Local view of one document's pipeline position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTracker {
    document_id: String,
    status: DocumentStatus,
    progress: Option<u8>,
    error_message: Option<String>,
}

impl DocumentTracker {
    pub fn new(document_id: impl Into<String>, status: DocumentStatus) -> Self {
        Self {
            document_id: document_id.into(),
            status,
            progress: None,
            error_message: None,
        }
    }

    pub fn from_document(document: &Document) -> Self {
        Self {
            document_id: document.id.clone(),
            status: document.status,
            progress: if document.status.is_terminal() {
                None
            } else {
                document.progress
            },
            error_message: document.error_message.clone(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    /// Progress while in flight; always `None` once terminal.
    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn violation(&self, reason: String) -> StreamError {
        StreamError::ProtocolViolation {
            key: StreamKey::ingest(self.document_id.as_str()).to_string(),
            reason,
        }
    }

    /// Apply one pushed status event.
    ///
    /// Returns the view update for an accepted change, `Ok(None)` when the
    /// document is already terminal, and `ProtocolViolation` for events that
    /// would move status backwards or progress sideways.
    pub fn apply(&mut self, event: &IngestionEvent) -> Result<Option<ViewUpdate>, StreamError> {
        if self.is_terminal() {
            debug!(document_id = %self.document_id, status = %event.status, "Ignoring event for finished document");
            return Ok(None);
        }
        if let Some(progress) = event.progress
            && progress > 100
        {
            return Err(self.violation(format!("progress {} out of range", progress)));
        }

        let next = event.status;
        if next.rank() < self.status.rank() {
            return Err(self.violation(format!("status moved from {} to {}", self.status, next)));
        }

        if next == self.status {
            let Some(progress) = event.progress else {
                return Err(self.violation(format!("repeated {} without progress", next)));
            };
            if self.progress.is_some_and(|current| progress <= current) {
                return Err(self.violation(format!(
                    "progress {} does not advance past {}",
                    progress,
                    self.progress.unwrap_or_default()
                )));
            }
            self.progress = Some(progress);
        } else {
            self.status = next;
            match next {
                DocumentStatus::Pending | DocumentStatus::Processing => {
                    self.progress = Some(event.progress.unwrap_or(0));
                }
                DocumentStatus::Completed => {
                    self.progress = None;
                }
                DocumentStatus::Failed => {
                    self.progress = None;
                    self.error_message = event
                        .error_message
                        .clone()
                        .or_else(|| event.content.clone());
                }
            }
        }

        Ok(Some(ViewUpdate::DocumentStatusChanged {
            document_id: self.document_id.clone(),
            status: self.status,
            progress: self.progress,
            error_message: self.error_message.clone(),
        }))
    }

    /// Reconcile with a polled snapshot. Snapshots that are not ahead of the
    /// local state are ignored.
    pub fn apply_snapshot(&mut self, document: &Document) -> Option<ViewUpdate> {
        let event = IngestionEvent {
            status: document.status,
            content: None,
            progress: document.progress,
            error_message: document.error_message.clone(),
        };
        match self.apply(&event) {
            Ok(update) => update,
            Err(e) => {
                debug!(error = %e, "Snapshot not ahead of local state");
                None
            }
        }
    }
}

/// Bounded polling used after an ingestion channel drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

/// Poll the document list until `tracker` reaches a terminal status, the
/// document disappears, or the attempt cap is hit.
///
/// Returns the terminal status, or `None` if polling gave up. Giving up is
/// projected as [`ViewUpdate::DocumentPollAbandoned`].
pub async fn poll_until_terminal(
    api: Arc<dyn BackendApi>,
    projector: ProjectorHandle,
    mut tracker: DocumentTracker,
    policy: PollPolicy,
) -> Option<DocumentStatus> {
    let document_id = tracker.document_id().to_string();
    info!(%document_id, max_attempts = policy.max_attempts, "Polling document status");

    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;

        let documents = match api.list_documents().await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(%document_id, attempt, error = %e, "Document poll failed");
                continue;
            }
        };

        let Some(snapshot) = documents.iter().find(|d| d.id == document_id) else {
            info!(%document_id, "Document no longer listed; stopping poll");
            projector.submit(ViewUpdate::DocumentRemoved { id: document_id });
            return None;
        };

        if let Some(update) = tracker.apply_snapshot(snapshot) {
            projector.submit(update);
        }
        if tracker.is_terminal() {
            info!(%document_id, status = %tracker.status(), attempt, "Document finished");
            return Some(tracker.status());
        }
    }

    warn!(%document_id, "Giving up on document status after {} polls", policy.max_attempts);
    projector.submit(ViewUpdate::DocumentPollAbandoned { document_id });
    None
}

/// Channel handler for one document's ingestion channel.
struct IngestionHandler {
    tracker: DocumentTracker,
    projector: ProjectorHandle,
    api: Arc<dyn BackendApi>,
    policy: PollPolicy,
    fallback_started: bool,
}

impl IngestionHandler {
    fn start_fallback(&mut self) {
        if self.tracker.is_terminal() || self.fallback_started {
            return;
        }
        self.fallback_started = true;
        tokio::spawn(poll_until_terminal(
            self.api.clone(),
            self.projector.clone(),
            self.tracker.clone(),
            self.policy,
        ));
    }
}

impl ChannelHandler for IngestionHandler {
    fn on_event(&mut self, envelope: Envelope) -> ControlFlow<()> {
        let Envelope::Ingestion(event) = envelope else {
            warn!("Ignoring non-ingestion event on ingestion channel");
            return ControlFlow::Continue(());
        };

        match self.tracker.apply(&event) {
            Ok(Some(update)) => {
                self.projector.submit(update);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring ingestion event"),
        }

        if self.tracker.is_terminal() {
            info!(document_id = %self.tracker.document_id(), status = %self.tracker.status(), "Ingestion finished");
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn on_error(&mut self, error: &StreamError) {
        warn!(document_id = %self.tracker.document_id(), error = %error, "Ingestion channel failed");
        self.start_fallback();
    }

    fn on_close(&mut self) {
        self.start_fallback();
    }
}

/// Keeps document rows current while they are being ingested.
#[derive(Clone)]
pub struct IngestionWatcher {
    connections: ConnectionManager,
    api: Arc<dyn BackendApi>,
    projector: ProjectorHandle,
    policy: PollPolicy,
}

impl fmt::Debug for IngestionWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionWatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl IngestionWatcher {
    pub fn new(
        connections: ConnectionManager,
        api: Arc<dyn BackendApi>,
        projector: ProjectorHandle,
        policy: PollPolicy,
    ) -> Self {
        Self {
            connections,
            api,
            projector,
            policy,
        }
    }

    /// Subscribe to a document's status channel.
    ///
    /// Terminal documents are not subscribed; `None` is returned.
    pub fn watch(&self, document: &Document) -> Option<ChannelHandle> {
        if document.status.is_terminal() {
            return None;
        }
        let handler = IngestionHandler {
            tracker: DocumentTracker::from_document(document),
            projector: self.projector.clone(),
            api: self.api.clone(),
            policy: self.policy,
            fallback_started: false,
        };
        Some(
            self.connections
                .open(StreamKey::ingest(document.id.as_str()), handler),
        )
    }

    /// Subscribe to every in-flight document.
    pub fn watch_all(&self, documents: &[Document]) -> Vec<ChannelHandle> {
        documents
            .iter()
            .filter_map(|document| self.watch(document))
            .collect()
    }

    /// Poll a document without a channel, e.g. when the stream endpoint is
    /// unavailable.
    pub fn poll(&self, document: &Document) -> JoinHandle<Option<DocumentStatus>> {
        tokio::spawn(poll_until_terminal(
            self.api.clone(),
            self.projector.clone(),
            DocumentTracker::from_document(document),
            self.policy,
        ))
    }

    /// Reload the document list and watch whatever is still in flight.
    pub async fn refresh(&self) -> Result<Vec<Document>, ApiError> {
        let documents = self.api.list_documents().await?;
        self.projector
            .submit(ViewUpdate::DocumentsLoaded(documents.clone()));
        self.watch_all(&documents);
        Ok(documents)
    }

    /// Upload files, add them to the view and watch their ingestion.
    pub async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<Document>, ApiError> {
        let documents = self.api.upload_documents(files).await?;
        for document in &documents {
            self.projector
                .submit(ViewUpdate::DocumentAdded(document.clone()));
        }
        self.watch_all(&documents);
        Ok(documents)
    }

    /// Ingest a web page and watch it.
    pub async fn ingest_url(&self, url: &str) -> Result<Document, ApiError> {
        let document = self.api.ingest_url(url).await?;
        self.projector
            .submit(ViewUpdate::DocumentAdded(document.clone()));
        self.watch(&document);
        Ok(document)
    }

    /// Delete a document and stop watching it.
    pub async fn delete(&self, document_id: &str) -> Result<(), ApiError> {
        self.api.delete_document(document_id).await?;
        self.projector.submit(ViewUpdate::DocumentRemoved {
            id: document_id.to_string(),
        });
        Ok(())
    }
}
