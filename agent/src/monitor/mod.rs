//! Control-plane health monitor
//!
//! Sweeps every registered node on a fixed interval: marks nodes with stale
//! heartbeats, probes each node, and feeds the outcome into the node
//! lifecycle. Results are kept per node for on-demand reads.

pub mod probe;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::errors::FleetError;
use crate::models::NodeStatus;
use crate::registry::{NodeEvent, NodeRegistry};
use crate::workers::{LoopHandle, ShutdownSignal};

pub use probe::{HttpProbe, NodeProbe};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(with = "crate::utils::serde_secs", default = "default_check_interval")]
    pub check_interval: Duration,

    /// Deadline for a single probe
    #[serde(with = "crate::utils::serde_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// Heartbeat age after which a node is marked degraded
    #[serde(with = "crate::utils::serde_secs", default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,
}

fn default_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(90)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            timeout: default_timeout(),
            heartbeat_timeout: default_heartbeat_timeout(),
        }
    }
}

/// Outcome of one node check.
///
/// Health figures are the node's last recorded values; a failed probe leaves
/// them as they were.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub node_id: String,
    pub status: NodeStatus,
    pub healthy: bool,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub uptime: i64,
    pub response_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStats {
    pub total_checks: u64,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
}

#[derive(Default)]
struct CheckLedger {
    last: HashMap<String, HealthCheckResult>,
    total: u64,
    successes: u64,
    total_response_ms: u64,
}

struct MonitorInner {
    config: MonitorConfig,
    registry: Arc<NodeRegistry>,
    probe: Arc<dyn NodeProbe>,
    ledger: RwLock<CheckLedger>,
}

pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    handle: Mutex<Option<LoopHandle>>,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig, registry: Arc<NodeRegistry>, probe: Arc<dyn NodeProbe>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                registry,
                probe,
                ledger: RwLock::new(CheckLedger::default()),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start sweeping: once now, then once per interval. Starting a running
    /// monitor does nothing.
    pub fn start(&self) -> Result<(), FleetError> {
        let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Health monitor already running");
            return Ok(());
        }

        let inner = self.inner.clone();
        *guard = Some(LoopHandle::spawn("health monitor", move |shutdown| async move {
            run(inner, tokio::time::sleep, shutdown).await;
        }));

        info!(
            "Health monitor started (interval {:?}, timeout {:?})",
            self.inner.config.check_interval, self.inner.config.timeout
        );
        Ok(())
    }

    /// Stop sweeping and wait for the loop to exit
    pub async fn stop(&self) -> Result<(), FleetError> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.stop().await?;
            info!("Health monitor stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Check one node now; `None` when the node is not registered
    pub async fn check_node(&self, node_id: &str) -> Result<Option<HealthCheckResult>, FleetError> {
        self.inner.check_node(node_id).await
    }

    /// Run one full sweep now
    pub async fn sweep(&self) -> Result<(), FleetError> {
        self.inner.sweep().await
    }

    /// Last recorded check for a node
    pub fn get_node_health_history(&self, node_id: &str) -> Option<HealthCheckResult> {
        let ledger = self.inner.ledger.read().unwrap_or_else(|e| e.into_inner());
        ledger.last.get(node_id).cloned()
    }

    pub fn stats(&self) -> HealthStats {
        let ledger = self.inner.ledger.read().unwrap_or_else(|e| e.into_inner());
        if ledger.total == 0 {
            return HealthStats {
                total_checks: 0,
                avg_response_time_ms: 0.0,
                success_rate: 1.0,
            };
        }
        HealthStats {
            total_checks: ledger.total,
            avg_response_time_ms: ledger.total_response_ms as f64 / ledger.total as f64,
            success_rate: ledger.successes as f64 / ledger.total as f64,
        }
    }
}

impl MonitorInner {
    async fn sweep(&self) -> Result<(), FleetError> {
        let stale = self
            .registry
            .mark_stale_nodes(self.config.heartbeat_timeout)
            .await?;
        if !stale.is_empty() {
            debug!("{} node(s) marked degraded for stale heartbeats", stale.len());
        }

        let nodes = self.registry.list_nodes().await?;
        debug!("Checking health of {} node(s)", nodes.len());

        let checks = nodes.iter().map(|node| self.check_node(&node.id));
        for (node, result) in nodes.iter().zip(join_all(checks).await) {
            if let Err(e) = result {
                warn!("Health check for node {} failed: {}", node.id, e);
            }
        }
        Ok(())
    }

    async fn check_node(&self, node_id: &str) -> Result<Option<HealthCheckResult>, FleetError> {
        let Some(node) = self.registry.get_node(node_id).await? else {
            warn!("Health check requested for unknown node {}", node_id);
            return Ok(None);
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.config.timeout, self.probe.probe(&node)).await
        {
            Ok(result) => result,
            Err(_) => Err(FleetError::Internal(format!(
                "probe timed out after {:?}",
                self.config.timeout
            ))),
        };
        let response_time_ms = started.elapsed().as_millis() as u64;

        let heartbeat_fresh =
            node.heartbeat_age_secs(Utc::now()) <= self.config.heartbeat_timeout.as_secs() as i64;
        let event = match &outcome {
            Ok(()) => NodeEvent::ProbeSucceeded { heartbeat_fresh },
            Err(_) => NodeEvent::ProbeFailed,
        };

        // The node may have been removed while the probe was in flight
        let Some(updated) = self.registry.apply_event(node_id, event).await? else {
            debug!("Node {} removed during health check, result dropped", node_id);
            return Ok(None);
        };
        let status = updated.status;
        if status != node.status {
            info!("Node {} moved from {} to {}", node_id, node.status, status);
        }

        let result = HealthCheckResult {
            node_id: node_id.to_string(),
            status,
            healthy: outcome.is_ok(),
            cpu_percent: node.health.cpu_percent,
            memory_percent: node.health.memory_percent,
            disk_percent: node.health.disk_percent,
            uptime: node.health.uptime_seconds,
            response_time_ms,
            error: outcome.err().map(|e| e.to_string()),
            checked_at: Utc::now(),
        };

        let mut ledger = self.ledger.write().unwrap_or_else(|e| e.into_inner());
        ledger.total += 1;
        ledger.total_response_ms += response_time_ms;
        if result.healthy {
            ledger.successes += 1;
        }
        ledger.last.insert(node_id.to_string(), result.clone());

        Ok(Some(result))
    }
}

async fn run<S, F>(inner: Arc<MonitorInner>, sleep_fn: S, mut shutdown_signal: ShutdownSignal)
where
    S: Fn(Duration) -> F,
    F: std::future::Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                debug!("Health monitor loop shutting down...");
                return;
            }
            result = inner.sweep() => {
                if let Err(e) = result {
                    error!("Health sweep failed: {}", e);
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                debug!("Health monitor loop shutting down...");
                return;
            }
            _ = sleep_fn(inner.config.check_interval) => {}
        }
    }
}
