use super::{BackendApi, Health, UploadFile};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::types::{
    ChatPrompt, ChatReply, ConnectionTest, Connector, ConnectorCreate, Conversation, ConversationDetail, Document,
    Settings, SettingsUpdate, SyncAccepted,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// REST client for the backend, rooted at `<api_url>/api`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    root: Url,
}

/// What a path refers to, so a 404 can be reported as `NotFound`.
struct Target<'a> {
    kind: &'a str,
    id: &'a str,
}

impl HttpBackend {
    pub fn new(config: &ServerConfig) -> Result<Self, ApiError> {
        let parsed = Url::parse(&config.api_url).map_err(|e| ApiError::InvalidUrl {
            url: config.api_url.clone(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl {
                url: config.api_url.clone(),
                message: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| ApiError::Request {
                url: config.api_url.clone(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            root: parsed,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `<api_url>/api/<segments...>`, each segment percent-encoded so an id
    /// cannot change the route.
    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.root.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url.into()
    }

    /// Send a request and return the raw body of a successful response.
    async fn execute(
        &self,
        url: &str,
        request: RequestBuilder,
        target: Option<Target<'_>>,
    ) -> Result<String, ApiError> {
        debug!(url = %url, "Sending backend request");

        let response = request.send().await.map_err(|e| ApiError::Request {
            url: url.to_string(),
            message: format!("Request failed: {}", e),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ApiError::Request {
            url: url.to_string(),
            message: format!("Failed to read response body: {}", e),
        })?;

        if status == StatusCode::NOT_FOUND
            && let Some(target) = target
        {
            return Err(ApiError::NotFound {
                kind: target.kind.to_string(),
                id: target.id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        request: RequestBuilder,
        target: Option<Target<'_>>,
    ) -> Result<T, ApiError> {
        let body = self.execute(url, request, target).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: format!("Invalid JSON: {}", e),
        })
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let url = self.url(&["conversations"]);
        self.fetch(&url, self.client.get(&url), None).await
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation, ApiError> {
        let url = self.url(&["conversations"]);
        let request = self.client.post(&url).json(&json!({ "title": title }));
        self.fetch(&url, request, None).await
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError> {
        let url = self.url(&["conversations", id]);
        let target = Target {
            kind: "Conversation",
            id,
        };
        self.fetch(&url, self.client.get(&url), Some(target)).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let url = self.url(&["conversations", id]);
        let target = Target {
            kind: "Conversation",
            id,
        };
        self.execute(&url, self.client.delete(&url), Some(target))
            .await
            .map(|_| ())
    }

    async fn send_message(&self, prompt: &ChatPrompt) -> Result<ChatReply, ApiError> {
        let url = self.url(&["chat"]);
        let target = prompt.conversation_id.as_deref().map(|id| Target {
            kind: "Conversation",
            id,
        });
        self.fetch(&url, self.client.post(&url).json(prompt), target)
            .await
    }

    async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        let url = self.url(&["documents"]);
        self.fetch(&url, self.client.get(&url), None).await
    }

    async fn upload_documents(&self, files: Vec<UploadFile>) -> Result<Vec<Document>, ApiError> {
        let url = self.url(&["documents", "upload"]);
        let form = files.into_iter().fold(Form::new(), |form, file| {
            form.part("files", Part::bytes(file.bytes).file_name(file.filename))
        });
        self.fetch(&url, self.client.post(&url).multipart(form), None)
            .await
    }

    async fn ingest_url(&self, target_url: &str) -> Result<Document, ApiError> {
        let url = self.url(&["documents", "url"]);
        let request = self.client.post(&url).json(&json!({ "url": target_url }));
        self.fetch(&url, request, None).await
    }

    async fn delete_document(&self, id: &str) -> Result<(), ApiError> {
        let url = self.url(&["documents", id]);
        let target = Target {
            kind: "Document",
            id,
        };
        self.execute(&url, self.client.delete(&url), Some(target))
            .await
            .map(|_| ())
    }

    async fn list_connectors(&self) -> Result<Vec<Connector>, ApiError> {
        let url = self.url(&["connectors"]);
        self.fetch(&url, self.client.get(&url), None).await
    }

    async fn create_connector(&self, request: &ConnectorCreate) -> Result<Connector, ApiError> {
        let url = self.url(&["connectors"]);
        self.fetch(&url, self.client.post(&url).json(request), None)
            .await
    }

    async fn test_connector(&self, id: &str) -> Result<ConnectionTest, ApiError> {
        let url = self.url(&["connectors", id, "test"]);
        let target = Target {
            kind: "Connector",
            id,
        };
        self.fetch(&url, self.client.post(&url), Some(target)).await
    }

    async fn sync_connector(&self, id: &str) -> Result<SyncAccepted, ApiError> {
        let url = self.url(&["connectors", id, "sync"]);
        let target = Target {
            kind: "Connector",
            id,
        };
        self.fetch(&url, self.client.post(&url), Some(target)).await
    }

    async fn delete_connector(&self, id: &str) -> Result<(), ApiError> {
        let url = self.url(&["connectors", id]);
        let target = Target {
            kind: "Connector",
            id,
        };
        self.execute(&url, self.client.delete(&url), Some(target))
            .await
            .map(|_| ())
    }

    async fn get_settings(&self) -> Result<Settings, ApiError> {
        let url = self.url(&["settings"]);
        self.fetch(&url, self.client.get(&url), None).await
    }

    async fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings, ApiError> {
        let url = self.url(&["settings"]);
        self.fetch(&url, self.client.put(&url).json(update), None)
            .await
    }

    async fn health(&self) -> Result<Health, ApiError> {
        let url = self.url(&["health"]);
        self.fetch(&url, self.client.get(&url), None).await
    }
}
