//! Deployment models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::FleetError;

/// Kind of workload a deployment runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    #[default]
    Backend,
    Worker,
    Cron,
}

impl FromStr for AppType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backend" => Ok(AppType::Backend),
            "worker" => Ok(AppType::Worker),
            "cron" => Ok(AppType::Cron),
            _ => Err(format!("Invalid app type: {}", s)),
        }
    }
}

/// Deployment status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Deploying,
    Running,
    Updating,
    Failed,
    Stopped,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Updating => "updating",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment variable passed to the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub secret: bool,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: false,
        }
    }
}

/// HTTP health check settings (seconds)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub interval: u32,
    pub timeout: u32,
    pub retries: u32,
}

/// Resource limits requested by a deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    pub memory_limit_mb: u64,

    /// Fractional cores
    pub cpu_limit: f64,
    pub storage_limit_mb: u64,
}

/// Desired-state description of an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub app_type: AppType,
    pub runtime: String,
    pub status: DeploymentStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_url: String,
    pub entrypoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub instances: u32,
    pub target_node_ids: Vec<String>,
    pub env_vars: Vec<EnvVar>,
    pub resources: Resources,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,

    /// Epoch milliseconds
    pub created_at: i64,

    /// Epoch milliseconds
    pub updated_at: i64,
}

/// Caller input for creating a deployment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDeployment {
    pub user_id: String,
    pub name: String,
    pub app_type: AppType,
    pub runtime: String,
    pub source_url: String,
    pub entrypoint: String,
    pub instances: u32,
    pub target_node_ids: Vec<String>,
    pub resources: Resources,
    pub env_vars: Vec<EnvVar>,
    pub health_check: Option<HealthCheck>,
    pub port: Option<u16>,
}

impl NewDeployment {
    /// Check the creation invariants and collapse duplicate target ids,
    /// keeping the first occurrence of each.
    pub fn validate(mut self) -> Result<Self, FleetError> {
        if self.name.trim().is_empty() {
            return Err(FleetError::ValidationFailed(
                "deployment name must not be empty".to_string(),
            ));
        }
        if self.instances < 1 {
            return Err(FleetError::ValidationFailed(
                "instances must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        self.target_node_ids
            .retain(|id| !id.is_empty() && seen.insert(id.clone()));
        if self.target_node_ids.is_empty() {
            return Err(FleetError::ValidationFailed(
                "at least one target node is required".to_string(),
            ));
        }

        Ok(self)
    }
}

/// Aggregate counts for an owner's deployments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub total_instances: u64,
    pub total_target_nodes: usize,
}
