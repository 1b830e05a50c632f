//! Settings file management

use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::errors::FleetError;
use crate::filesys::file::File;
use crate::heartbeat::HeartbeatConfig;
use crate::logs::LogLevel;
use crate::models::CloudProvider;
use crate::monitor::MonitorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Node identity; generated at start-up when unset
    #[serde(default)]
    pub node_id: Option<String>,

    #[serde(default = "default_node_owner")]
    pub node_owner: String,

    #[serde(default)]
    pub node_provider: CloudProvider,

    /// Public endpoint the health monitor probes
    #[serde(default = "default_node_endpoint")]
    pub node_endpoint: String,

    #[serde(default = "default_node_region")]
    pub node_region: String,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub health_monitor: HealthMonitorSettings,

    #[serde(default = "default_true")]
    pub enable_heartbeat: bool,

    #[serde(default = "default_true")]
    pub enable_health_monitor: bool,
}

fn default_true() -> bool {
    true
}

fn default_node_owner() -> String {
    "local".to_string()
}

fn default_node_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_node_region() -> String {
    "local".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            node_id: None,
            node_owner: default_node_owner(),
            node_provider: CloudProvider::default(),
            node_endpoint: default_node_endpoint(),
            node_region: default_node_region(),
            agent: AgentConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            health_monitor: HealthMonitorSettings::default(),
            enable_heartbeat: true,
            enable_health_monitor: true,
        }
    }
}

/// Health monitor schedule (seconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMonitorSettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

fn default_check_interval() -> u64 {
    30
}

fn default_check_timeout() -> u64 {
    5
}

impl Default for HealthMonitorSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            timeout_secs: default_check_timeout(),
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults when the file does not exist
    pub async fn load(file: &File) -> Result<Self, FleetError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await
    }

    /// Monitor configuration; the staleness threshold follows the heartbeat timeout
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            check_interval: std::time::Duration::from_secs(self.health_monitor.check_interval_secs),
            timeout: std::time::Duration::from_secs(self.health_monitor.timeout_secs),
            heartbeat_timeout: self.heartbeat.timeout,
        }
    }
}
