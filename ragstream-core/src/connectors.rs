//! Connector sync coordination.
//!
//! A sync request is fire-and-forget on the server: acceptance means the job
//! started, not that it finished. The coordinator marks the connector
//! `syncing`, then reconciles with exactly one deferred refresh. Completion
//! is only observed through later refreshes.

use crate::api::BackendApi;
use crate::error::ApiError;
use crate::projector::{ProjectorHandle, ViewUpdate};
use crate::types::{ConnectionTest, Connector, ConnectorCreate, ConnectorType};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ConnectorSyncCoordinator {
    api: Arc<dyn BackendApi>,
    projector: ProjectorHandle,
    refresh_delay: Duration,
}

impl fmt::Debug for ConnectorSyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorSyncCoordinator")
            .field("refresh_delay", &self.refresh_delay)
            .finish_non_exhaustive()
    }
}

impl ConnectorSyncCoordinator {
    pub fn new(api: Arc<dyn BackendApi>, projector: ProjectorHandle, refresh_delay: Duration) -> Self {
        Self {
            api,
            projector,
            refresh_delay,
        }
    }

    /// Reload the connector list into the view.
    pub async fn refresh(&self) -> Result<Vec<Connector>, ApiError> {
        let connectors = self.api.list_connectors().await?;
        self.projector
            .submit(ViewUpdate::ConnectorsLoaded(connectors.clone()));
        Ok(connectors)
    }

    /// Request a sync.
    ///
    /// On acceptance the connector is shown as `syncing` and a single
    /// refresh runs after the configured delay; its handle is returned.
    pub async fn sync(&self, connector_id: &str) -> Result<JoinHandle<()>, ApiError> {
        let accepted = self.api.sync_connector(connector_id).await?;
        info!(%connector_id, status = %accepted.status, "Connector sync accepted");
        self.projector.submit(ViewUpdate::ConnectorSyncStarted {
            id: connector_id.to_string(),
        });

        let this = self.clone();
        let connector_id = connector_id.to_string();
        Ok(tokio::spawn(async move {
            tokio::time::sleep(this.refresh_delay).await;
            if let Err(e) = this.refresh().await {
                warn!(%connector_id, error = %e, "Refresh after sync failed");
            }
        }))
    }

    /// Test a connector's credentials, then refresh.
    pub async fn test(&self, connector_id: &str) -> Result<ConnectionTest, ApiError> {
        let result = self.api.test_connector(connector_id).await?;
        info!(%connector_id, ok = result.ok, "Connector test finished");
        self.refresh().await?;
        Ok(result)
    }

    pub async fn create(
        &self,
        name: &str,
        connector_type: ConnectorType,
        config: serde_json::Value,
    ) -> Result<Connector, ApiError> {
        let request = ConnectorCreate {
            name: name.to_string(),
            connector_type,
            config,
        };
        let connector = self.api.create_connector(&request).await?;
        info!(connector_id = %connector.id, "Connector created");
        self.refresh().await?;
        Ok(connector)
    }

    pub async fn delete(&self, connector_id: &str) -> Result<(), ApiError> {
        self.api.delete_connector(connector_id).await?;
        self.projector.submit(ViewUpdate::ConnectorRemoved {
            id: connector_id.to_string(),
        });
        self.refresh().await?;
        Ok(())
    }
}
