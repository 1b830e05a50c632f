//! Periodic metrics sampling and container health checks

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::AgentState;
use crate::errors::FleetError;
use crate::models::{
    ApplicationMetrics, ContainerCounts, InstanceStatus, NodeHealthStatus, SystemHealth,
};
use crate::runtime::helpers::{bytes_to_mb, calculate_cpu_percent, calculate_memory_percent};
use crate::runtime::{ContainerDetails, EngineInfo};
use crate::telemetry::HostMetrics;
use crate::utils::{unix_now_millis, unix_now_secs};
use crate::workers::ShutdownSignal;

/// Share of engine memory assumed in use when the host reports nothing
const MEMORY_USED_ESTIMATE: f64 = 0.5;

pub(crate) async fn run<S, F>(
    state: Arc<AgentState>,
    sleep_fn: S,
    mut shutdown_signal: ShutdownSignal,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Sampling loop started for node {}", state.node_id);
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => break,
            _ = sleep_fn(state.config.sample_interval) => {}
        }

        // A pass that has begun runs to completion
        tick(&state).await;
    }
    info!("Sampling loop stopped for node {}", state.node_id);
}

/// One pass: per-instance metrics, container health, node snapshot
pub(crate) async fn tick(state: &AgentState) {
    collect_metrics(state).await;
    perform_health_checks(state).await;
    let snapshot = collect_node_health(state).await;
    state.set_health(snapshot);
}

async fn with_deadline<T, Fut>(state: &AgentState, what: &str, call: Fut) -> Result<T, FleetError>
where
    Fut: Future<Output = Result<T, crate::runtime::ContainerRuntimeError>>,
{
    match tokio::time::timeout(state.config.runtime_call_timeout, call).await {
        Ok(result) => result.map_err(FleetError::from),
        Err(_) => Err(FleetError::RuntimeOperationFailed(format!(
            "{} timed out after {:?}",
            what, state.config.runtime_call_timeout
        ))),
    }
}

/// (instance id, container id, status) of every instance matching `wanted`
async fn targets(
    state: &AgentState,
    wanted: &[InstanceStatus],
) -> Vec<(String, String, InstanceStatus)> {
    state
        .instances
        .read()
        .await
        .values()
        .filter(|i| wanted.contains(&i.status))
        .filter_map(|i| {
            i.container_id()
                .map(|cid| (i.id.clone(), cid.to_string(), i.status))
        })
        .collect()
}

async fn collect_metrics(state: &AgentState) {
    let Ok(runtime) = state.runtime() else {
        return;
    };

    for (id, container_id, _) in targets(state, &[InstanceStatus::Running]).await {
        let stats = match with_deadline(state, "stats", runtime.container_stats(&container_id)).await
        {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Failed to collect metrics for application {}: {}", id, e);
                continue;
            }
        };

        let sample = ApplicationMetrics {
            cpu_percent: calculate_cpu_percent(&stats),
            memory_usage_mb: bytes_to_mb(stats.memory_usage_bytes),
            memory_percent: calculate_memory_percent(&stats),
            network_rx_mb: bytes_to_mb(stats.network_rx_bytes),
            network_tx_mb: bytes_to_mb(stats.network_tx_bytes),
            health_status: String::new(),
            timestamp: unix_now_millis(),
        };

        let _ = state
            .commit(&id, |instance| {
                let health_status = std::mem::take(&mut instance.metrics.health_status);
                instance.metrics = ApplicationMetrics {
                    health_status,
                    ..sample
                };
            })
            .await;
    }
}

/// Next status for an instance given what inspect reported
pub(crate) fn assess(
    current: InstanceStatus,
    inspected: &Result<ContainerDetails, FleetError>,
) -> (InstanceStatus, Option<String>) {
    match inspected {
        Err(e) => {
            let next = if current == InstanceStatus::Failing {
                InstanceStatus::Failed
            } else {
                InstanceStatus::Failing
            };
            (next, Some(format!("Failed to inspect container: {}", e)))
        }
        Ok(details) if details.running => (InstanceStatus::Running, None),
        Ok(details) if details.exit_code != 0 => (
            InstanceStatus::Failed,
            Some(format!("Container exited with code {}", details.exit_code)),
        ),
        Ok(_) => (InstanceStatus::Stopped, None),
    }
}

async fn perform_health_checks(state: &AgentState) {
    let Ok(runtime) = state.runtime() else {
        return;
    };

    let watched = [InstanceStatus::Running, InstanceStatus::Failing];
    for (id, container_id, observed) in targets(state, &watched).await {
        let inspected =
            with_deadline(state, "inspect", runtime.inspect_container(&container_id)).await;
        let (next, message) = assess(observed, &inspected);

        match next {
            InstanceStatus::Failing => warn!("Application {} is failing: {:?}", id, message),
            InstanceStatus::Failed => warn!("Application {} failed: {:?}", id, message),
            InstanceStatus::Stopped => info!("Container for application {} stopped", id),
            _ if observed != next => info!("Application {} recovered", id),
            _ => {}
        }

        let now = unix_now_millis();
        let _ = state
            .commit(&id, |instance| {
                // A lifecycle call may have moved the instance meanwhile
                if instance.status != observed
                    || instance.container_id() != Some(container_id.as_str())
                {
                    return;
                }
                instance.status = next;
                instance.error_message = message;
                instance.metrics.health_status = match next {
                    InstanceStatus::Running => "healthy",
                    InstanceStatus::Stopped => "stopped",
                    _ => "unhealthy",
                }
                .to_string();
                if matches!(next, InstanceStatus::Failed | InstanceStatus::Stopped)
                    && inspected.is_ok()
                {
                    instance.container.stopped_at = now;
                }
            })
            .await;
    }
}

async fn collect_node_health(state: &AgentState) -> NodeHealthStatus {
    let host = sample_host(state).await;

    let engine = match state.runtime() {
        Ok(runtime) => match with_deadline(state, "info", runtime.engine_info()).await {
            Ok(info) => Some(info),
            Err(e) => {
                error!("Failed to read container engine info: {}", e);
                None
            }
        },
        Err(_) => None,
    };

    let counts = {
        let instances = state.instances.read().await;
        let mut counts = ContainerCounts {
            total: instances.len(),
            ..Default::default()
        };
        for instance in instances.values() {
            match instance.status {
                InstanceStatus::Running => counts.running += 1,
                InstanceStatus::Failing | InstanceStatus::Failed => counts.failed += 1,
                InstanceStatus::Stopped => counts.stopped += 1,
                InstanceStatus::Pending | InstanceStatus::Starting => {}
            }
        }
        counts
    };

    NodeHealthStatus {
        timestamp: unix_now_secs(),
        uptime_seconds: state.uptime_secs(),
        system: system_health(host.as_ref(), engine.as_ref()),
        containers: counts,
    }
}

/// Combine host counters with the engine's memory total.
///
/// The engine total wins when present. Used memory comes from the host; when
/// the host reports none, half of the total is assumed.
pub(crate) fn system_health(
    host: Option<&HostMetrics>,
    engine: Option<&EngineInfo>,
) -> SystemHealth {
    let total_bytes = engine
        .map(|e| e.mem_total_bytes)
        .filter(|total| *total > 0)
        .or_else(|| host.map(|h| h.memory_total_bytes))
        .unwrap_or_default();

    let total_mb = bytes_to_mb(total_bytes);
    let used_mb = match host {
        Some(h) if h.memory_used_bytes > 0 => bytes_to_mb(h.memory_used_bytes.min(total_bytes)),
        _ => total_mb * MEMORY_USED_ESTIMATE,
    };

    SystemHealth {
        cpu_percent: host.map(|h| h.cpu_percent).unwrap_or_default(),
        memory_percent: if total_mb > 0.0 {
            used_mb / total_mb * 100.0
        } else {
            0.0
        },
        disk_percent: host.map(|h| h.disk_percent).unwrap_or_default(),
        total_memory_mb: total_mb,
        used_memory_mb: used_mb,
    }
}

async fn sample_host(state: &AgentState) -> Option<HostMetrics> {
    let host = state.host.clone();
    let sampled = tokio::task::spawn_blocking(move || {
        let mut sampler = host.lock().unwrap_or_else(|e| e.into_inner());
        sampler.sample()
    })
    .await;

    match sampled {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            debug!("Host sampling task failed: {}", e);
            None
        }
    }
}
