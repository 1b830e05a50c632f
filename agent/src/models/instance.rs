//! Application instance models owned by the node agent

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::deployment::Deployment;
use crate::runtime::PortProtocol;

/// Per-instance container lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Pending,
    Starting,
    Running,
    Failing,
    Failed,
    Stopped,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Failing => "failing",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime container bound to an instance (epoch milliseconds, 0 when unset)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub id: Option<String>,
    pub created_at: i64,
    pub started_at: i64,
    pub stopped_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub storage_limit_mb: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub path: String,
    pub interval: u32,
    pub timeout: u32,
    pub retries: u32,
}

/// Resolved, immutable copy of the deployment fields an instance needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
    pub runtime: String,
    pub entrypoint: String,
    pub resources: ResourceLimits,
    pub env_vars: BTreeMap<String, String>,
    pub health_check: Option<HealthCheckConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: PortProtocol,
}

/// Latest sampled metrics for an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMetrics {
    pub cpu_percent: f64,
    pub memory_usage_mb: f64,
    pub memory_percent: f64,
    pub network_rx_mb: f64,
    pub network_tx_mb: f64,
    pub health_status: String,

    /// Epoch milliseconds of the sample
    pub timestamp: i64,
}

impl Default for ApplicationMetrics {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_usage_mb: 0.0,
            memory_percent: 0.0,
            network_rx_mb: 0.0,
            network_tx_mb: 0.0,
            health_status: "unknown".to_string(),
            timestamp: 0,
        }
    }
}

/// One materialization of a deployment on this node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInstance {
    pub id: String,
    pub deployment_id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub container: ContainerInfo,
    pub manifest: DeploymentManifest,
    pub ports: Vec<PortMapping>,
    pub metrics: ApplicationMetrics,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Epoch milliseconds
    pub created_at: i64,

    /// Epoch milliseconds
    pub updated_at: i64,
}

impl ApplicationInstance {
    /// Build a pending instance from a deployment descriptor.
    ///
    /// The single optional deployment port is published on the same host port.
    pub fn from_deployment(id: String, deployment: &Deployment, now_millis: i64) -> Self {
        let env_vars = deployment
            .env_vars
            .iter()
            .map(|ev| (ev.key.clone(), ev.value.clone()))
            .collect();

        let health_check = deployment.health_check.as_ref().map(|hc| HealthCheckConfig {
            path: hc.path.clone(),
            interval: hc.interval,
            timeout: hc.timeout,
            retries: hc.retries,
        });

        let ports = deployment
            .port
            .map(|port| PortMapping {
                container_port: port,
                host_port: port,
                protocol: PortProtocol::Tcp,
            })
            .into_iter()
            .collect();

        Self {
            id,
            deployment_id: deployment.id.clone(),
            name: deployment.name.clone(),
            status: InstanceStatus::Pending,
            container: ContainerInfo::default(),
            manifest: DeploymentManifest {
                runtime: deployment.runtime.clone(),
                entrypoint: deployment.entrypoint.clone(),
                resources: ResourceLimits {
                    memory_limit_mb: deployment.resources.memory_limit_mb,
                    cpu_limit: deployment.resources.cpu_limit,
                    storage_limit_mb: deployment.resources.storage_limit_mb,
                },
                env_vars,
                health_check,
            },
            ports,
            metrics: ApplicationMetrics {
                timestamp: now_millis,
                ..Default::default()
            },
            error_message: None,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container.id.as_deref()
    }

    pub fn is_running_with_container(&self) -> bool {
        self.status == InstanceStatus::Running && self.container.id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub total_memory_mb: f64,
    pub used_memory_mb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCounts {
    pub total: usize,
    pub running: usize,
    pub failed: usize,
    pub stopped: usize,
}

/// Aggregate health snapshot published by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealthStatus {
    /// Unix seconds
    pub timestamp: i64,
    pub uptime_seconds: i64,
    pub system: SystemHealth,
    pub containers: ContainerCounts,
}
