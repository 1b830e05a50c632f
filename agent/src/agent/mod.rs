//! Node agent
//!
//! Owns this node's application instances, drives their containers through
//! the runtime adapter, samples metrics on a fixed tick, and holds the
//! node's provider credentials in a [`CredentialVault`].
//!
//! The instance map lock is held only to read or commit metadata. Runtime
//! calls are made without it.

pub mod lifecycle;
pub mod sampler;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::FleetError;
use crate::models::{ApplicationInstance, Deployment, InstanceStatus, NodeHealthStatus};
use crate::runtime::DynContainerRuntime;
use crate::telemetry::HostSampler;
use crate::utils::{generate_uuid, unix_now_millis, unix_now_secs};
use crate::vault::CredentialVault;
use crate::workers::LoopHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Connect to the local container runtime at start-up
    #[serde(default = "default_runtime_enabled")]
    pub runtime_enabled: bool,

    #[serde(with = "crate::utils::serde_secs", default = "default_sample_interval")]
    pub sample_interval: Duration,

    /// Deadline for each stats/inspect/info call made by the sampler
    #[serde(with = "crate::utils::serde_secs", default = "default_runtime_call_timeout")]
    pub runtime_call_timeout: Duration,

    /// Grace period given to a container before it is killed on stop
    #[serde(with = "crate::utils::serde_secs", default = "default_stop_grace_period")]
    pub stop_grace_period: Duration,
}

fn default_runtime_enabled() -> bool {
    true
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_runtime_call_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(10)
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            runtime_enabled: default_runtime_enabled(),
            sample_interval: default_sample_interval(),
            runtime_call_timeout: default_runtime_call_timeout(),
            stop_grace_period: default_stop_grace_period(),
        }
    }
}

/// State shared between the agent API and its sampling loop
pub(crate) struct AgentState {
    pub(crate) node_id: String,
    pub(crate) config: AgentConfig,
    pub(crate) runtime: Option<DynContainerRuntime>,
    pub(crate) instances: tokio::sync::RwLock<HashMap<String, ApplicationInstance>>,
    pub(crate) health: RwLock<Option<NodeHealthStatus>>,
    pub(crate) host: Arc<Mutex<HostSampler>>,

    /// Unix seconds
    pub(crate) started_at: i64,
}

impl AgentState {
    pub(crate) fn runtime(&self) -> Result<&DynContainerRuntime, FleetError> {
        self.runtime.as_ref().ok_or_else(|| {
            FleetError::RuntimeUnavailable("no container runtime connection".to_string())
        })
    }

    pub(crate) fn uptime_secs(&self) -> i64 {
        (unix_now_secs() - self.started_at).max(0)
    }

    pub(crate) async fn instance(&self, id: &str) -> Result<ApplicationInstance, FleetError> {
        self.instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("application {}", id)))
    }

    /// Apply `apply` to a stored instance and bump its `updated_at`
    pub(crate) async fn commit<F>(&self, id: &str, apply: F) -> Result<ApplicationInstance, FleetError>
    where
        F: FnOnce(&mut ApplicationInstance),
    {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| FleetError::NotFound(format!("application {}", id)))?;
        apply(instance);
        instance.updated_at = unix_now_millis();
        Ok(instance.clone())
    }

    pub(crate) fn set_health(&self, snapshot: NodeHealthStatus) {
        let mut health = self.health.write().unwrap_or_else(|e| e.into_inner());
        *health = Some(snapshot);
    }
}

pub struct NodeAgent {
    state: Arc<AgentState>,
    vault: Arc<CredentialVault>,
    handle: Mutex<Option<LoopHandle>>,
}

impl NodeAgent {
    /// Build an agent; an empty or missing `node_id` gets a generated one.
    ///
    /// Without a runtime the agent still serves registration and credential
    /// calls, but every container operation fails with `RuntimeUnavailable`.
    pub fn new(
        node_id: Option<String>,
        config: AgentConfig,
        vault: Arc<CredentialVault>,
        runtime: Option<DynContainerRuntime>,
    ) -> Self {
        let node_id = node_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_uuid);

        info!(
            "Node agent initialized: {} (runtime {})",
            node_id,
            if runtime.is_some() { "connected" } else { "unavailable" }
        );

        Self {
            state: Arc::new(AgentState {
                node_id,
                config,
                runtime,
                instances: tokio::sync::RwLock::new(HashMap::new()),
                health: RwLock::new(None),
                host: Arc::new(Mutex::new(HostSampler::new())),
                started_at: unix_now_secs(),
            }),
            vault,
            handle: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.state.node_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.state.config
    }

    pub fn has_runtime(&self) -> bool {
        self.state.runtime.is_some()
    }

    /// Create a `pending` instance for a deployment. The runtime is not contacted.
    pub async fn register_application(
        &self,
        deployment: &Deployment,
    ) -> Result<ApplicationInstance, FleetError> {
        let instance =
            ApplicationInstance::from_deployment(generate_uuid(), deployment, unix_now_millis());

        self.state
            .instances
            .write()
            .await
            .insert(instance.id.clone(), instance.clone());

        info!(
            "Application registered: {} ({}, deployment {})",
            instance.id, instance.name, instance.deployment_id
        );
        Ok(instance)
    }

    pub async fn get_application(&self, id: &str) -> Result<ApplicationInstance, FleetError> {
        self.state.instance(id).await
    }

    /// Every instance on this node, oldest first
    pub async fn list_applications(&self) -> Vec<ApplicationInstance> {
        let mut instances: Vec<ApplicationInstance> =
            self.state.instances.read().await.values().cloned().collect();
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        instances
    }

    pub async fn update_application_status(
        &self,
        id: &str,
        status: InstanceStatus,
    ) -> Result<ApplicationInstance, FleetError> {
        let updated = self
            .state
            .commit(id, |instance| instance.status = status)
            .await?;
        debug!("Application {} status set to {}", id, status);
        Ok(updated)
    }

    /// Forget an instance, removing its container first when it still has one
    pub async fn remove_application(&self, id: &str) -> Result<(), FleetError> {
        let instance = self.state.instance(id).await?;

        if let (Some(container_id), Some(runtime)) =
            (instance.container_id(), self.state.runtime.as_ref())
        {
            if let Err(e) = runtime.remove_container(container_id, true).await {
                warn!(
                    "Failed to remove container {} of application {}: {}",
                    container_id, id, e
                );
            }
        }

        self.state.instances.write().await.remove(id);
        info!("Application removed: {}", id);
        Ok(())
    }

    /// Latest node health snapshot; before the first sample only uptime is set
    pub fn get_node_health(&self) -> NodeHealthStatus {
        let health = self.state.health.read().unwrap_or_else(|e| e.into_inner());
        match health.as_ref() {
            Some(snapshot) => snapshot.clone(),
            None => NodeHealthStatus {
                timestamp: unix_now_secs(),
                uptime_seconds: self.state.uptime_secs(),
                ..Default::default()
            },
        }
    }

    pub fn update_node_health(&self, snapshot: NodeHealthStatus) {
        self.state.set_health(snapshot);
    }

    pub fn store_credential<T: Serialize + ?Sized>(
        &self,
        provider: &str,
        credential: &T,
    ) -> Result<(), FleetError> {
        self.vault.store(provider, credential)
    }

    pub fn get_credential<T: DeserializeOwned>(&self, provider: &str) -> Result<T, FleetError> {
        self.vault.get(provider)
    }

    /// Start the sampling loop. Without a runtime there is nothing to sample
    /// and no loop is started.
    pub fn start(&self) -> Result<(), FleetError> {
        let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(FleetError::AlreadyRunning(format!(
                "agent for node {}",
                self.state.node_id
            )));
        }

        if self.state.runtime.is_none() {
            warn!(
                "Node agent {} started without a container runtime; sampling disabled",
                self.state.node_id
            );
            return Ok(());
        }

        let state = self.state.clone();
        *guard = Some(LoopHandle::spawn("agent sampler", move |shutdown| async move {
            sampler::run(state, tokio::time::sleep, shutdown).await;
        }));

        info!(
            "Node agent {} started (sample interval {:?})",
            self.state.node_id, self.state.config.sample_interval
        );
        Ok(())
    }

    /// Stop the sampling loop. In-flight runtime calls finish on their own.
    pub async fn stop(&self) -> Result<(), FleetError> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.stop().await?;
        }
        info!("Node agent {} stopped", self.state.node_id);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run one sampling pass now: metrics, container health, node snapshot
    pub async fn sample_once(&self) -> Result<(), FleetError> {
        self.state.runtime()?;
        sampler::tick(&self.state).await;
        Ok(())
    }
}
