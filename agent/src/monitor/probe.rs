//! Node reachability probes

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::FleetError;
use crate::models::Node;

/// Checks whether a node answers
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn probe(&self, node: &Node) -> Result<(), FleetError>;
}

/// GETs the node's public endpoint; any non-5xx answer counts as reachable
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, FleetError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FleetError::ConfigError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeProbe for HttpProbe {
    async fn probe(&self, node: &Node) -> Result<(), FleetError> {
        let response = self
            .client
            .get(&node.endpoint)
            .send()
            .await
            .map_err(|e| FleetError::Internal(format!("probe of {} failed: {}", node.endpoint, e)))?;

        let status = response.status();
        debug!("Probe of node {} returned {}", node.id, status);
        if status.is_server_error() {
            return Err(FleetError::Internal(format!(
                "probe of {} returned {}",
                node.endpoint, status
            )));
        }
        Ok(())
    }
}
