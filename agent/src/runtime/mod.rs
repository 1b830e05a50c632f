//! Container runtime adapter
//!
//! The agent drives containers exclusively through [`ContainerRuntime`], so
//! tests can swap the Docker engine for an in-process fake.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod docker;
pub mod helpers;

pub use docker::DockerRuntime;

pub type DynContainerRuntime = Arc<dyn ContainerRuntime>;

/// Container state as reported by inspect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub running: bool,
    pub exit_code: i64,
    pub status: String,
}

/// Raw point-in-time counters from the runtime's stats endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerStatsSnapshot {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub online_cpus: u32,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Engine-wide information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInfo {
    pub mem_total_bytes: u64,
    pub containers_running: u64,
    pub containers_stopped: u64,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<(), ContainerRuntimeError>;
    async fn create_container(&self, spec: ContainerSpec) -> Result<String, ContainerRuntimeError>;
    async fn start_container(&self, id: &str) -> Result<(), ContainerRuntimeError>;
    async fn stop_container(&self, id: &str, timeout_secs: i32)
        -> Result<(), ContainerRuntimeError>;
    async fn restart_container(
        &self,
        id: &str,
        timeout_secs: i32,
    ) -> Result<(), ContainerRuntimeError>;
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerRuntimeError>;
    async fn container_logs(&self, id: &str, tail: usize) -> Result<String, ContainerRuntimeError>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, ContainerRuntimeError>;
    async fn container_stats(
        &self,
        id: &str,
    ) -> Result<ContainerStatsSnapshot, ContainerRuntimeError>;
    async fn engine_info(&self) -> Result<EngineInfo, ContainerRuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    UnlessStopped,
}

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub env: Vec<(String, String)>,
    pub ports: Vec<PortBinding>,
    pub command: Option<Vec<String>>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub restart_policy: RestartPolicy,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            env: Vec::new(),
            ports: Vec::new(),
            command: None,
            memory_bytes: None,
            nano_cpus: None,
            restart_policy: RestartPolicy::No,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

impl PortProtocol {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
        }
    }
}

impl std::fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Host binding for one container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: PortProtocol,
    pub host_ip: Option<String>,
}

impl PortBinding {
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port,
            protocol: PortProtocol::Tcp,
            host_ip: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ContainerRuntimeError {
    #[error("failed to connect to runtime ({context}): {source}")]
    Connection {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to pull image {image}: {source}")]
    PullImage {
        image: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to create container {name}: {source}")]
    CreateContainer {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to start container {id}: {source}")]
    StartContainer {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to stop container {id}: {source}")]
    StopContainer {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to restart container {id}: {source}")]
    RestartContainer {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to remove container {id}: {source}")]
    RemoveContainer {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to read logs of container {id}: {source}")]
    Logs {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to inspect container {id}: {source}")]
    InspectContainer {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to collect stats for container {id}: {source}")]
    Stats {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to query engine info: {0}")]
    Info(#[source] anyhow::Error),
    #[error("container {id} not found")]
    NotFound { id: String },
}

impl ContainerRuntimeError {
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ContainerRuntimeError::Connection { .. })
    }
}
