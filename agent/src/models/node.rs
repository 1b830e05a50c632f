//! Node models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported cloud platforms a node can run on
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    #[default]
    Render,
    Railway,
    Flyio,
    Vercel,
    Netlify,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Render => "render",
            CloudProvider::Railway => "railway",
            CloudProvider::Flyio => "flyio",
            CloudProvider::Vercel => "vercel",
            CloudProvider::Netlify => "netlify",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "render" => Ok(CloudProvider::Render),
            "railway" => Ok(CloudProvider::Railway),
            "flyio" | "fly.io" | "fly" => Ok(CloudProvider::Flyio),
            "vercel" => Ok(CloudProvider::Vercel),
            "netlify" => Ok(CloudProvider::Netlify),
            _ => Err(format!("Unsupported provider: {}", s)),
        }
    }
}

/// Node lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Initializing,
    Ready,
    Busy,
    Degraded,
    Failed,
    Removed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Initializing => "initializing",
            NodeStatus::Ready => "ready",
            NodeStatus::Busy => "busy",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Failed => "failed",
            NodeStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initializing" => Ok(NodeStatus::Initializing),
            "ready" => Ok(NodeStatus::Ready),
            "busy" => Ok(NodeStatus::Busy),
            "degraded" => Ok(NodeStatus::Degraded),
            "failed" => Ok(NodeStatus::Failed),
            "removed" => Ok(NodeStatus::Removed),
            _ => Err(format!("Invalid node status: {}", s)),
        }
    }
}

/// Last-known health of a node.
///
/// Field names follow the JSON column layout of the node store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealth {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,

    #[serde(rename = "uptime")]
    pub uptime_seconds: i64,

    /// Unix seconds of the last heartbeat
    #[serde(rename = "lastHeartbeat")]
    pub last_heartbeat_unix: i64,
}

/// Capacity a node advertises at registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCapabilities {
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub disk_gb: u32,
    pub network_bandwidth: String,
}

/// Provider OAuth credentials attached to a node (token already encrypted)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCredentials {
    #[serde(rename = "oauthTokenEncrypted")]
    pub oauth_token_encrypted: String,

    #[serde(rename = "oauthProvider")]
    pub oauth_provider: String,

    /// Unix seconds
    #[serde(rename = "oauthExpiresAt")]
    pub oauth_expires_at: i64,
}

/// A registered remote worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub user_id: String,
    pub provider: CloudProvider,
    pub endpoint: String,
    pub region: String,
    pub status: NodeStatus,
    pub health: NodeHealth,
    pub capabilities: NodeCapabilities,
    pub credentials: NodeCredentials,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_metrics_update: DateTime<Utc>,
}

impl Node {
    /// Seconds since the last heartbeat, never negative
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat).num_seconds().max(0)
    }
}

/// Optional filters for listing an owner's nodes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub provider: Option<CloudProvider>,
    pub status: Option<NodeStatus>,
}

impl NodeFilter {
    pub fn by_provider(provider: CloudProvider) -> Self {
        Self {
            provider: Some(provider),
            status: None,
        }
    }

    pub fn by_status(status: NodeStatus) -> Self {
        Self {
            provider: None,
            status: Some(status),
        }
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.provider.map_or(true, |p| node.provider == p)
            && self.status.map_or(true, |s| node.status == s)
    }
}

/// Mean health across an owner's nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageHealth {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

/// Aggregate counts for an owner's nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub total: usize,
    pub by_provider: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub avg_health: AverageHealth,
}
