//! Application configuration options

use std::time::Duration;

use crate::agent::AgentConfig;
use crate::heartbeat::HeartbeatConfig;
use crate::models::CloudProvider;
use crate::monitor::MonitorConfig;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,
    pub layout: StorageLayout,
    pub node: NodeOptions,
    pub agent: AgentConfig,
    pub heartbeat: HeartbeatConfig,
    pub monitor: MonitorConfig,
    pub enable_heartbeat: bool,
    pub enable_health_monitor: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            node: NodeOptions {
                node_id: settings.node_id.clone(),
                owner: settings.node_owner.clone(),
                provider: settings.node_provider,
                endpoint: settings.node_endpoint.clone(),
                region: settings.node_region.clone(),
            },
            agent: settings.agent.clone(),
            heartbeat: settings.heartbeat.clone(),
            monitor: settings.monitor_config(),
            enable_heartbeat: settings.enable_heartbeat,
            enable_health_monitor: settings.enable_health_monitor,
        }
    }
}

/// Identity of the node this process runs on
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub node_id: Option<String>,
    pub owner: String,
    pub provider: CloudProvider,
    pub endpoint: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum time the ordered shutdown may take
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
