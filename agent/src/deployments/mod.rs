//! Deployment manager
//!
//! Control-plane record of desired-state deployments and the nodes they
//! target. Timestamps are epoch milliseconds.

pub mod store;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::FleetError;
use crate::models::{Deployment, DeploymentStats, DeploymentStatus, EnvVar, NewDeployment};
use crate::utils::{generate_uuid, unix_now_millis};

pub use store::{DeploymentStore, DeploymentUpdate, InMemoryDeploymentStore};

pub struct DeploymentManager {
    store: Arc<dyn DeploymentStore>,
}

impl DeploymentManager {
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDeploymentStore::new()))
    }

    /// Validate and store a new deployment in `pending`
    pub async fn create_deployment(&self, request: NewDeployment) -> Result<Deployment, FleetError> {
        let request = request.validate()?;
        let now = unix_now_millis();

        let deployment = Deployment {
            id: generate_uuid(),
            user_id: request.user_id,
            name: request.name,
            app_type: request.app_type,
            runtime: request.runtime,
            status: DeploymentStatus::Pending,
            source_url: request.source_url,
            entrypoint: request.entrypoint,
            port: request.port,
            instances: request.instances,
            target_node_ids: request.target_node_ids,
            env_vars: request.env_vars,
            resources: request.resources,
            health_check: request.health_check,
            created_at: now,
            updated_at: now,
        };

        self.store.insert(deployment.clone()).await?;
        info!(
            "Deployment created: {} ({}, {} instance(s) on {} node(s))",
            deployment.id,
            deployment.name,
            deployment.instances,
            deployment.target_node_ids.len()
        );
        Ok(deployment)
    }

    pub async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, FleetError> {
        self.store.get(id).await
    }

    /// An owner's deployments, newest first, optionally narrowed by status
    pub async fn get_user_deployments(
        &self,
        user_id: &str,
        status: Option<DeploymentStatus>,
    ) -> Result<Vec<Deployment>, FleetError> {
        let mut deployments: Vec<Deployment> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|d| d.user_id == user_id && status.map_or(true, |s| d.status == s))
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    pub async fn get_deployments_by_status(
        &self,
        user_id: &str,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, FleetError> {
        self.get_user_deployments(user_id, Some(status)).await
    }

    pub async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<Option<Deployment>, FleetError> {
        let updated = self
            .mutate(id, Box::new(move |d: &mut Deployment| {
                d.status = status;
                Ok(())
            }))
            .await?;
        if updated.is_some() {
            info!("Deployment {} status updated to {}", id, status);
        }
        Ok(updated)
    }

    /// Change the desired instance count
    pub async fn scale_deployment(
        &self,
        id: &str,
        instances: u32,
    ) -> Result<Option<Deployment>, FleetError> {
        if instances < 1 {
            return Err(FleetError::ValidationFailed(
                "instances must be at least 1".to_string(),
            ));
        }
        let updated = self
            .mutate(id, Box::new(move |d: &mut Deployment| {
                d.instances = instances;
                Ok(())
            }))
            .await?;
        if updated.is_some() {
            info!("Deployment {} scaled to {} instance(s)", id, instances);
        }
        Ok(updated)
    }

    /// Replace the environment variable list
    pub async fn update_environment_vars(
        &self,
        id: &str,
        env_vars: Vec<EnvVar>,
    ) -> Result<Option<Deployment>, FleetError> {
        self.mutate(
            id,
            Box::new(move |d: &mut Deployment| {
                d.env_vars = env_vars;
                Ok(())
            }),
        )
        .await
    }

    /// Add a target node; adding one already targeted changes nothing but `updatedAt`
    pub async fn add_target_node(
        &self,
        id: &str,
        node_id: &str,
    ) -> Result<Option<Deployment>, FleetError> {
        if node_id.is_empty() {
            return Err(FleetError::ValidationFailed(
                "target node id must not be empty".to_string(),
            ));
        }
        let node_id = node_id.to_string();
        self.mutate(
            id,
            Box::new(move |d: &mut Deployment| {
                if !d.target_node_ids.contains(&node_id) {
                    d.target_node_ids.push(node_id);
                }
                Ok(())
            }),
        )
        .await
    }

    pub async fn remove_target_node(
        &self,
        id: &str,
        node_id: &str,
    ) -> Result<Option<Deployment>, FleetError> {
        let node_id = node_id.to_string();
        self.mutate(
            id,
            Box::new(move |d: &mut Deployment| {
                d.target_node_ids.retain(|n| *n != node_id);
                Ok(())
            }),
        )
        .await
    }

    /// Delete a deployment; `false` when it did not exist
    pub async fn delete_deployment(&self, id: &str) -> Result<bool, FleetError> {
        let removed = self.store.delete(id).await?;
        if removed {
            info!("Deployment deleted: {}", id);
        } else {
            debug!("Delete requested for unknown deployment {}", id);
        }
        Ok(removed)
    }

    pub async fn deployment_stats(&self, user_id: &str) -> Result<DeploymentStats, FleetError> {
        let deployments = self.get_user_deployments(user_id, None).await?;

        let mut by_status = BTreeMap::new();
        let mut total_instances = 0u64;
        let mut targets = HashSet::new();
        for deployment in &deployments {
            *by_status.entry(deployment.status.to_string()).or_insert(0) += 1;
            total_instances += u64::from(deployment.instances);
            targets.extend(deployment.target_node_ids.iter().map(String::as_str));
        }

        Ok(DeploymentStats {
            total: deployments.len(),
            by_status,
            total_instances,
            total_target_nodes: targets.len(),
        })
    }

    async fn mutate(
        &self,
        id: &str,
        apply: DeploymentUpdate,
    ) -> Result<Option<Deployment>, FleetError> {
        self.store
            .update(
                id,
                Box::new(move |d: &mut Deployment| {
                    apply(d)?;
                    d.updated_at = unix_now_millis().max(d.updated_at);
                    Ok(())
                }),
            )
            .await
    }
}
