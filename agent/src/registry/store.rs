//! Node persistence boundary

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::FleetError;
use crate::models::Node;

/// Mutation applied to a stored node while the store holds it exclusively
pub type NodeUpdate = Box<dyn FnOnce(&mut Node) -> Result<(), FleetError> + Send>;

/// Storage for node records.
///
/// Missing records are `Ok(None)` / `Ok(false)`; `Err` is reserved for
/// storage failures.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn insert(&self, node: Node) -> Result<(), FleetError>;
    async fn get(&self, id: &str) -> Result<Option<Node>, FleetError>;
    async fn list(&self) -> Result<Vec<Node>, FleetError>;

    /// Apply `apply` atomically and return the updated record
    async fn update(&self, id: &str, apply: NodeUpdate) -> Result<Option<Node>, FleetError>;
    async fn delete(&self, id: &str) -> Result<bool, FleetError>;
}

#[derive(Default)]
pub struct InMemoryNodeStore {
    nodes: RwLock<HashMap<String, Node>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn insert(&self, node: Node) -> Result<(), FleetError> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.id) {
            return Err(FleetError::Conflict(format!(
                "node {} already exists",
                node.id
            )));
        }
        nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Node>, FleetError> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Node>, FleetError> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn update(&self, id: &str, apply: NodeUpdate) -> Result<Option<Node>, FleetError> {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(id) else {
            return Ok(None);
        };

        // Apply to a copy so a rejected update leaves the record untouched
        let mut updated = node.clone();
        apply(&mut updated)?;
        *node = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool, FleetError> {
        Ok(self.nodes.write().await.remove(id).is_some())
    }
}
