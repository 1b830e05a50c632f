//! Heartbeat service
//!
//! Periodically asserts one node's liveness to the registry. Failed sends are
//! retried with a fixed delay; exhausting the retries is logged and the loop
//! keeps going.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::errors::FleetError;
use crate::workers::{LoopHandle, ShutdownSignal};

/// Receiver of liveness assertions
#[async_trait]
pub trait LivenessReporter: Send + Sync {
    async fn report_liveness(&self, node_id: &str) -> Result<(), FleetError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Time between heartbeats
    #[serde(with = "crate::utils::serde_secs", default = "default_interval")]
    pub interval: Duration,

    /// Staleness threshold after which a node is considered dead
    #[serde(with = "crate::utils::serde_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// Extra attempts after a failed send
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(with = "crate::utils::serde_secs", default = "default_retry_delay")]
    pub retry_delay: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// Result of one heartbeat including its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub attempts: u32,
    pub delivered: bool,
}

pub struct HeartbeatService {
    node_id: String,
    config: HeartbeatConfig,
    reporter: Arc<dyn LivenessReporter>,
    handle: Mutex<Option<LoopHandle>>,
}

impl HeartbeatService {
    pub fn new(
        node_id: impl Into<String>,
        config: HeartbeatConfig,
        reporter: Arc<dyn LivenessReporter>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            config,
            reporter,
            handle: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Start the loop: one heartbeat now, then one per interval
    pub fn start(&self) -> Result<(), FleetError> {
        let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(FleetError::AlreadyRunning(format!(
                "heartbeat for node {}",
                self.node_id
            )));
        }

        let node_id = self.node_id.clone();
        let config = self.config.clone();
        let reporter = self.reporter.clone();
        *guard = Some(LoopHandle::spawn("heartbeat", move |shutdown| async move {
            run(&config, &node_id, reporter.as_ref(), tokio::time::sleep, shutdown).await;
        }));

        info!(
            "Heartbeat started for node {} (interval {:?})",
            self.node_id, self.config.interval
        );
        Ok(())
    }

    /// Stop the loop; a no-op when it is not running
    pub async fn stop(&self) -> Result<(), FleetError> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match handle {
            Some(handle) => {
                handle.stop().await?;
                info!("Heartbeat stopped for node {}", self.node_id);
            }
            None => debug!("Heartbeat for node {} is not running", self.node_id),
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

    /// Send one heartbeat now, retrying per the configuration.
    ///
    /// Failures are logged, never returned.
    pub async fn send_heartbeat(&self) -> HeartbeatOutcome {
        send_with_retry(
            &self.config,
            &self.node_id,
            self.reporter.as_ref(),
            tokio::time::sleep,
        )
        .await
    }
}

/// Run the heartbeat loop until `shutdown_signal` resolves
pub async fn run<S, F>(
    config: &HeartbeatConfig,
    node_id: &str,
    reporter: &dyn LivenessReporter,
    sleep_fn: S,
    mut shutdown_signal: ShutdownSignal,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                debug!("Heartbeat loop for node {} shutting down...", node_id);
                return;
            }
            _ = send_with_retry(config, node_id, reporter, &sleep_fn) => {}
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                debug!("Heartbeat loop for node {} shutting down...", node_id);
                return;
            }
            _ = sleep_fn(config.interval) => {}
        }
    }
}

/// Deliver one heartbeat, making at most `retry_attempts + 1` attempts
pub async fn send_with_retry<S, F>(
    config: &HeartbeatConfig,
    node_id: &str,
    reporter: &dyn LivenessReporter,
    sleep_fn: S,
) -> HeartbeatOutcome
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let max_attempts = config.retry_attempts + 1;

    for attempt in 1..=max_attempts {
        match reporter.report_liveness(node_id).await {
            Ok(()) => {
                debug!("Heartbeat delivered for node {} (attempt {})", node_id, attempt);
                return HeartbeatOutcome {
                    attempts: attempt,
                    delivered: true,
                };
            }
            Err(e) => {
                warn!(
                    "Heartbeat attempt {}/{} for node {} failed: {}",
                    attempt, max_attempts, node_id, e
                );
                if attempt < max_attempts {
                    sleep_fn(config.retry_delay).await;
                }
            }
        }
    }

    error!(
        "Heartbeat for node {} failed after {} attempts",
        node_id, max_attempts
    );
    HeartbeatOutcome {
        attempts: max_attempts,
        delivered: false,
    }
}
