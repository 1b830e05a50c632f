//! Container lifecycle for application instances

use tracing::{info, warn};

use super::NodeAgent;
use crate::errors::FleetError;
use crate::models::{ApplicationInstance, InstanceStatus};
use crate::runtime::helpers::image_for_runtime;
use crate::runtime::{ContainerRuntime, ContainerRuntimeError, ContainerSpec, PortBinding, RestartPolicy};
use crate::utils::unix_now_millis;

const CONTAINER_NAME_PREFIX: &str = "fleetd-";
const PUBLISH_HOST_IP: &str = "0.0.0.0";
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Runtime container description for an instance. Fails when a resource
/// limit does not fit the runtime's units.
pub fn container_spec(instance: &ApplicationInstance) -> Result<ContainerSpec, FleetError> {
    let manifest = &instance.manifest;
    let mut spec = ContainerSpec::new(image_for_runtime(&manifest.runtime));

    spec.name = Some(format!("{}{}", CONTAINER_NAME_PREFIX, instance.id));
    spec.env = manifest
        .env_vars
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    spec.ports = instance
        .ports
        .iter()
        .map(|p| PortBinding {
            container_port: p.container_port,
            host_port: p.host_port,
            protocol: p.protocol,
            host_ip: Some(PUBLISH_HOST_IP.to_string()),
        })
        .collect();

    if !manifest.entrypoint.trim().is_empty() {
        spec.command = Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            manifest.entrypoint.clone(),
        ]);
    }
    let memory_mb = manifest.resources.memory_limit_mb;
    if memory_mb > 0 {
        let bytes = memory_mb
            .checked_mul(BYTES_PER_MB)
            .and_then(|bytes| i64::try_from(bytes).ok())
            .ok_or_else(|| {
                FleetError::ValidationFailed(format!("memory limit of {} MB is too large", memory_mb))
            })?;
        spec.memory_bytes = Some(bytes);
    }

    let cpu_limit = manifest.resources.cpu_limit;
    if !cpu_limit.is_finite() {
        return Err(FleetError::ValidationFailed(format!(
            "cpu limit {} is not a number of cores",
            cpu_limit
        )));
    }
    if cpu_limit > 0.0 {
        spec.nano_cpus = Some((cpu_limit * 1e9) as i64);
    }
    spec.restart_policy = RestartPolicy::UnlessStopped;
    Ok(spec)
}

/// Pull, create and start. A container that was created but failed to start
/// is force-removed before the error is returned.
async fn provision(
    runtime: &dyn ContainerRuntime,
    spec: ContainerSpec,
) -> Result<String, ContainerRuntimeError> {
    runtime.pull_image(&spec.image).await?;
    let container_id = runtime.create_container(spec).await?;

    if let Err(e) = runtime.start_container(&container_id).await {
        if let Err(cleanup) = runtime.remove_container(&container_id, true).await {
            warn!(
                "Failed to clean up container {} after start failure: {}",
                container_id, cleanup
            );
        }
        return Err(e);
    }
    Ok(container_id)
}

impl NodeAgent {
    /// Materialize an instance as a running container. On failure the
    /// status is left as it was and only the error message is recorded.
    pub async fn start_container(&self, id: &str) -> Result<ApplicationInstance, FleetError> {
        let runtime = self.state.runtime()?.clone();
        let instance = self.state.instance(id).await?;
        let spec = container_spec(&instance)?;
        info!(
            "Starting container for application {} (image {})",
            id, spec.image
        );

        match provision(runtime.as_ref(), spec).await {
            Ok(container_id) => {
                let now = unix_now_millis();
                let updated = self
                    .state
                    .commit(id, |instance| {
                        instance.container.id = Some(container_id.clone());
                        instance.container.created_at = now;
                        instance.container.started_at = now;
                        instance.container.stopped_at = 0;
                        instance.status = InstanceStatus::Running;
                        instance.error_message = None;
                    })
                    .await?;
                info!("Container {} started for application {}", container_id, id);
                Ok(updated)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Failed to start application {}: {}", id, message);
                // The instance may have been removed while the runtime was busy
                let _ = self
                    .state
                    .commit(id, |instance| instance.error_message = Some(message))
                    .await;
                Err(e.into())
            }
        }
    }

    /// Stop the instance's container, allowing the configured grace period
    pub async fn stop_container(&self, id: &str) -> Result<ApplicationInstance, FleetError> {
        let runtime = self.state.runtime()?.clone();
        let container_id = self.require_container(id).await?;
        let grace = self.state.config.stop_grace_period.as_secs() as i32;

        runtime.stop_container(&container_id, grace).await?;

        let now = unix_now_millis();
        let updated = self
            .state
            .commit(id, |instance| {
                instance.container.stopped_at = now;
                instance.status = InstanceStatus::Stopped;
                instance.metrics.health_status = "stopped".to_string();
            })
            .await?;
        info!("Container {} stopped for application {}", container_id, id);
        Ok(updated)
    }

    pub async fn restart_container(&self, id: &str) -> Result<ApplicationInstance, FleetError> {
        let runtime = self.state.runtime()?.clone();
        let container_id = self.require_container(id).await?;
        let grace = self.state.config.stop_grace_period.as_secs() as i32;

        runtime.restart_container(&container_id, grace).await?;

        let now = unix_now_millis();
        let updated = self
            .state
            .commit(id, |instance| {
                instance.container.started_at = now;
                instance.status = InstanceStatus::Running;
                instance.error_message = None;
            })
            .await?;
        info!("Container {} restarted for application {}", container_id, id);
        Ok(updated)
    }

    /// Last `tail` lines of the container's combined stdout and stderr
    pub async fn container_logs(&self, id: &str, tail: usize) -> Result<String, FleetError> {
        let runtime = self.state.runtime()?.clone();
        let container_id = self.require_container(id).await?;
        Ok(runtime.container_logs(&container_id, tail).await?)
    }

    /// Stop (when running) and force-remove the container. An instance
    /// without a container is left as is.
    pub async fn remove_container(&self, id: &str) -> Result<(), FleetError> {
        let runtime = self.state.runtime()?.clone();
        let instance = self.state.instance(id).await?;
        let Some(container_id) = instance.container.id.clone() else {
            return Ok(());
        };

        if instance.status == InstanceStatus::Running {
            if let Err(e) = self.stop_container(id).await {
                warn!(
                    "Failed to stop container {} before removal: {}",
                    container_id, e
                );
            }
        }

        runtime.remove_container(&container_id, true).await?;

        self.state
            .commit(id, |instance| {
                if instance.container.id.as_deref() == Some(container_id.as_str()) {
                    instance.container.id = None;
                }
            })
            .await?;
        info!("Container {} removed for application {}", container_id, id);
        Ok(())
    }

    async fn require_container(&self, id: &str) -> Result<String, FleetError> {
        let instance = self.state.instance(id).await?;
        instance
            .container
            .id
            .ok_or_else(|| FleetError::NoContainer(id.to_string()))
    }
}
