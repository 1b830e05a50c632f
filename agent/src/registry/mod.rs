//! Node registry
//!
//! Control-plane record of every node: identity, lifecycle status, last
//! health snapshot. Status changes go through [`fsm::transition`].

pub mod fsm;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::FleetError;
use crate::heartbeat::LivenessReporter;
use crate::models::{
    AverageHealth, CloudProvider, Node, NodeCapabilities, NodeCredentials, NodeFilter,
    NodeHealth, NodeStats, NodeStatus,
};
use crate::utils::generate_uuid;

pub use fsm::NodeEvent;
pub use store::{InMemoryNodeStore, NodeStore, NodeUpdate};

/// Registration request for a new node
#[derive(Debug, Clone)]
pub struct NewNode {
    /// Caller-chosen id; generated when unset
    pub id: Option<String>,
    pub user_id: String,
    pub provider: CloudProvider,
    pub endpoint: String,
    pub region: String,
    pub capabilities: NodeCapabilities,
    pub credentials: NodeCredentials,
}

pub struct NodeRegistry {
    store: Arc<dyn NodeStore>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Registry backed by an in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryNodeStore::new()))
    }

    /// Register a node in `initializing` with zeroed health
    pub async fn register_node(&self, request: NewNode) -> Result<Node, FleetError> {
        if request.user_id.trim().is_empty() {
            return Err(FleetError::ValidationFailed(
                "node owner must not be empty".to_string(),
            ));
        }
        url::Url::parse(&request.endpoint).map_err(|e| {
            FleetError::ValidationFailed(format!("invalid endpoint {}: {}", request.endpoint, e))
        })?;

        let now = Utc::now();
        let node = Node {
            id: request
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(generate_uuid),
            user_id: request.user_id,
            provider: request.provider,
            endpoint: request.endpoint,
            region: request.region,
            status: NodeStatus::Initializing,
            health: NodeHealth::default(),
            capabilities: request.capabilities,
            credentials: request.credentials,
            created_at: now,
            last_heartbeat: now,
            last_metrics_update: now,
        };

        self.store.insert(node.clone()).await?;
        info!(
            "Node registered: {} (owner {}, provider {}, region {})",
            node.id, node.user_id, node.provider, node.region
        );
        Ok(node)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<Node>, FleetError> {
        self.store.get(node_id).await
    }

    /// An owner's nodes matching `filter`, newest first
    pub async fn get_user_nodes(
        &self,
        user_id: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<Node>, FleetError> {
        let mut nodes: Vec<Node> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|n| n.user_id == user_id && filter.matches(n))
            .collect();
        nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(nodes)
    }

    pub async fn get_nodes_by_provider(
        &self,
        user_id: &str,
        provider: CloudProvider,
    ) -> Result<Vec<Node>, FleetError> {
        self.get_user_nodes(user_id, &NodeFilter::by_provider(provider))
            .await
    }

    pub async fn get_nodes_by_status(
        &self,
        user_id: &str,
        status: NodeStatus,
    ) -> Result<Vec<Node>, FleetError> {
        self.get_user_nodes(user_id, &NodeFilter::by_status(status))
            .await
    }

    /// Every registered node, regardless of owner
    pub async fn list_nodes(&self) -> Result<Vec<Node>, FleetError> {
        self.store.list().await
    }

    /// Explicit status change, validated against the lifecycle edges
    pub async fn update_node_status(
        &self,
        node_id: &str,
        status: NodeStatus,
    ) -> Result<Option<Node>, FleetError> {
        let updated = self.apply_event(node_id, NodeEvent::SetStatus(status)).await?;
        if updated.is_some() {
            info!("Node {} status updated to {}", node_id, status);
        }
        Ok(updated)
    }

    pub async fn update_node_health(
        &self,
        node_id: &str,
        health: NodeHealth,
    ) -> Result<Option<Node>, FleetError> {
        self.store
            .update(
                node_id,
                Box::new(move |node: &mut Node| {
                    node.health = health;
                    node.last_metrics_update = Utc::now();
                    Ok(())
                }),
            )
            .await
    }

    /// Record a heartbeat: refresh the liveness timestamps and recover the status
    pub async fn record_heartbeat(&self, node_id: &str) -> Result<Option<Node>, FleetError> {
        self.store
            .update(
                node_id,
                Box::new(|node: &mut Node| {
                    let next = fsm::transition(node.status, &NodeEvent::Heartbeat)?;
                    let now = Utc::now();
                    node.status = next;
                    node.last_heartbeat = now;
                    node.health.last_heartbeat_unix = now.timestamp();
                    Ok(())
                }),
            )
            .await
    }

    /// Apply a lifecycle event to one node
    pub async fn apply_event(
        &self,
        node_id: &str,
        event: NodeEvent,
    ) -> Result<Option<Node>, FleetError> {
        self.store
            .update(
                node_id,
                Box::new(move |node: &mut Node| {
                    node.status = fsm::transition(node.status, &event)?;
                    Ok(())
                }),
            )
            .await
    }

    /// Move every live node whose last heartbeat is older than `timeout` to
    /// `degraded`, returning the ids that changed
    pub async fn mark_stale_nodes(&self, timeout: Duration) -> Result<Vec<String>, FleetError> {
        let now = Utc::now();
        let timeout_secs = timeout.as_secs() as i64;
        let mut marked = Vec::new();

        for node in self.store.list().await? {
            let live = matches!(
                node.status,
                NodeStatus::Initializing | NodeStatus::Ready | NodeStatus::Busy
            );
            if !live || node.heartbeat_age_secs(now) <= timeout_secs {
                continue;
            }

            // Re-check under the store's exclusive update in case a heartbeat landed
            let updated = self
                .store
                .update(
                    &node.id,
                    Box::new(move |node: &mut Node| {
                        if node.heartbeat_age_secs(Utc::now()) > timeout_secs {
                            node.status = fsm::transition(node.status, &NodeEvent::HeartbeatStale)?;
                        }
                        Ok(())
                    }),
                )
                .await?;

            if let Some(updated) = updated {
                if updated.status == NodeStatus::Degraded {
                    warn!(
                        "Node {} missed heartbeats for more than {}s, marked degraded",
                        updated.id, timeout_secs
                    );
                    marked.push(updated.id);
                }
            }
        }

        Ok(marked)
    }

    /// Delete a node; `false` when it did not exist
    pub async fn remove_node(&self, node_id: &str) -> Result<bool, FleetError> {
        let removed = self.store.delete(node_id).await?;
        if removed {
            info!("Node removed: {}", node_id);
        } else {
            debug!("Remove requested for unknown node {}", node_id);
        }
        Ok(removed)
    }

    pub async fn node_stats(&self, user_id: &str) -> Result<NodeStats, FleetError> {
        let nodes = self.get_user_nodes(user_id, &NodeFilter::default()).await?;

        let mut by_provider = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let (mut cpu, mut memory, mut disk) = (0.0, 0.0, 0.0);

        for node in &nodes {
            *by_provider.entry(node.provider.to_string()).or_insert(0) += 1;
            *by_status.entry(node.status.to_string()).or_insert(0) += 1;
            cpu += node.health.cpu_percent;
            memory += node.health.memory_percent;
            disk += node.health.disk_percent;
        }

        let avg_health = if nodes.is_empty() {
            AverageHealth::default()
        } else {
            let n = nodes.len() as f64;
            AverageHealth {
                cpu: cpu / n,
                memory: memory / n,
                disk: disk / n,
            }
        };

        Ok(NodeStats {
            total: nodes.len(),
            by_provider,
            by_status,
            avg_health,
        })
    }
}

#[async_trait]
impl LivenessReporter for NodeRegistry {
    async fn report_liveness(&self, node_id: &str) -> Result<(), FleetError> {
        match self.record_heartbeat(node_id).await? {
            Some(_) => Ok(()),
            None => Err(FleetError::NotFound(format!("node {}", node_id))),
        }
    }
}
