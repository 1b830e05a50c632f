//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::agent::NodeAgent;
use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{connect_runtime, AppState};
use crate::errors::FleetError;
use crate::heartbeat::HeartbeatService;
use crate::monitor::{HealthMonitor, HttpProbe};

/// Run fleetd until `shutdown_signal` resolves
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), FleetError> {
    info!("Initializing fleetd {}...", version);

    let runtime = connect_runtime(&options).await;
    let app_state = Arc::new(AppState::init(&options, runtime).await?);
    let mut shutdown_manager = ShutdownManager::new(options.lifecycle.clone());

    if let Err(e) = init(&options, app_state.clone(), &mut shutdown_manager) {
        error!("Failed to start fleetd: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    info!(
        "fleetd running as node {} ({}, {})",
        app_state.local_node.id, app_state.local_node.provider, app_state.local_node.region
    );

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

fn init(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), FleetError> {
    app_state.agent.start()?;
    shutdown_manager.with_agent(app_state.agent.clone());

    if options.enable_heartbeat {
        init_heartbeat(options, &app_state, shutdown_manager)?;
    }

    if options.enable_health_monitor {
        init_health_monitor(options, &app_state, shutdown_manager)?;
    }

    Ok(())
}

fn init_heartbeat(
    options: &AppOptions,
    app_state: &AppState,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), FleetError> {
    info!("Initializing heartbeat...");

    let heartbeat = Arc::new(HeartbeatService::new(
        app_state.local_node.id.clone(),
        options.heartbeat.clone(),
        app_state.registry.clone(),
    ));
    heartbeat.start()?;

    shutdown_manager.with_heartbeat(heartbeat);
    Ok(())
}

fn init_health_monitor(
    options: &AppOptions,
    app_state: &AppState,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), FleetError> {
    info!("Initializing health monitor...");

    let probe = Arc::new(HttpProbe::new(options.monitor.timeout)?);
    let monitor = Arc::new(HealthMonitor::new(
        options.monitor.clone(),
        app_state.registry.clone(),
        probe,
    ));
    monitor.start()?;

    shutdown_manager.with_health_monitor(monitor);
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    lifecycle_options: LifecycleOptions,
    heartbeat: Option<Arc<HeartbeatService>>,
    health_monitor: Option<Arc<HealthMonitor>>,
    agent: Option<Arc<NodeAgent>>,
}

impl ShutdownManager {
    fn new(lifecycle_options: LifecycleOptions) -> Self {
        Self {
            lifecycle_options,
            heartbeat: None,
            health_monitor: None,
            agent: None,
        }
    }

    fn with_heartbeat(&mut self, heartbeat: Arc<HeartbeatService>) {
        self.heartbeat = Some(heartbeat);
    }

    fn with_health_monitor(&mut self, monitor: Arc<HealthMonitor>) {
        self.health_monitor = Some(monitor);
    }

    fn with_agent(&mut self, agent: Arc<NodeAgent>) {
        self.agent = Some(agent);
    }

    async fn shutdown(&mut self) -> Result<(), FleetError> {
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FleetError::ShutdownError(format!(
                "shutdown timed out after {:?}",
                self.lifecycle_options.max_shutdown_delay
            ))),
        }
    }

    /// Stop liveness first, then the control-plane monitor, then the agent
    async fn shutdown_impl(&mut self) -> Result<(), FleetError> {
        info!("Shutting down fleetd...");
        let mut first_error = None;

        if let Some(heartbeat) = self.heartbeat.take() {
            if let Err(e) = heartbeat.stop().await {
                error!("Failed to stop heartbeat: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(monitor) = self.health_monitor.take() {
            if let Err(e) = monitor.stop().await {
                error!("Failed to stop health monitor: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(agent) = self.agent.take() {
            if let Err(e) = agent.stop().await {
                error!("Failed to stop node agent: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("fleetd shut down");
                Ok(())
            }
        }
    }
}
