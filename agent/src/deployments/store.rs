//! Deployment persistence boundary

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::FleetError;
use crate::models::Deployment;

pub type DeploymentUpdate = Box<dyn FnOnce(&mut Deployment) -> Result<(), FleetError> + Send>;

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn insert(&self, deployment: Deployment) -> Result<(), FleetError>;
    async fn get(&self, id: &str) -> Result<Option<Deployment>, FleetError>;
    async fn list(&self) -> Result<Vec<Deployment>, FleetError>;

    /// Apply `apply` atomically and return the updated record
    async fn update(
        &self,
        id: &str,
        apply: DeploymentUpdate,
    ) -> Result<Option<Deployment>, FleetError>;
    async fn delete(&self, id: &str) -> Result<bool, FleetError>;
}

#[derive(Default)]
pub struct InMemoryDeploymentStore {
    deployments: RwLock<HashMap<String, Deployment>>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn insert(&self, deployment: Deployment) -> Result<(), FleetError> {
        let mut deployments = self.deployments.write().await;
        if deployments.contains_key(&deployment.id) {
            return Err(FleetError::Conflict(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        deployments.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, FleetError> {
        Ok(self.deployments.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Deployment>, FleetError> {
        Ok(self.deployments.read().await.values().cloned().collect())
    }

    async fn update(
        &self,
        id: &str,
        apply: DeploymentUpdate,
    ) -> Result<Option<Deployment>, FleetError> {
        let mut deployments = self.deployments.write().await;
        let Some(deployment) = deployments.get_mut(id) else {
            return Ok(None);
        };

        let mut updated = deployment.clone();
        apply(&mut updated)?;
        *deployment = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool, FleetError> {
        Ok(self.deployments.write().await.remove(id).is_some())
    }
}
