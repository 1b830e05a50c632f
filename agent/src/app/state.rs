//! Application state
//!
//! Every component is built once here and shared by `Arc`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::NodeAgent;
use crate::app::options::AppOptions;
use crate::deployments::DeploymentManager;
use crate::errors::FleetError;
use crate::models::{Node, NodeCapabilities, NodeCredentials};
use crate::registry::{NewNode, NodeRegistry};
use crate::runtime::{DockerRuntime, DynContainerRuntime};
use crate::vault::CredentialVault;

pub struct AppState {
    pub registry: Arc<NodeRegistry>,
    pub deployments: Arc<DeploymentManager>,
    pub vault: Arc<CredentialVault>,
    pub agent: Arc<NodeAgent>,

    /// Registry record of the node this process runs on
    pub local_node: Node,
}

impl AppState {
    pub async fn init(
        options: &AppOptions,
        runtime: Option<DynContainerRuntime>,
    ) -> Result<Self, FleetError> {
        options.layout.setup().await?;

        let master_secret = options.layout.load_or_create_master_secret().await?;
        let vault = Arc::new(CredentialVault::new(&master_secret));

        let agent = Arc::new(NodeAgent::new(
            options.node.node_id.clone(),
            options.agent.clone(),
            vault.clone(),
            runtime,
        ));

        let registry = Arc::new(NodeRegistry::in_memory());
        let local_node = registry
            .register_node(NewNode {
                id: Some(agent.node_id().to_string()),
                user_id: options.node.owner.clone(),
                provider: options.node.provider,
                endpoint: options.node.endpoint.clone(),
                region: options.node.region.clone(),
                capabilities: NodeCapabilities::default(),
                credentials: NodeCredentials::default(),
            })
            .await?;

        Ok(Self {
            registry,
            deployments: Arc::new(DeploymentManager::in_memory()),
            vault,
            agent,
            local_node,
        })
    }
}

/// Connect to the local Docker engine. An unreachable engine is logged and
/// the agent runs without container support.
pub async fn connect_runtime(options: &AppOptions) -> Option<DynContainerRuntime> {
    if !options.agent.runtime_enabled {
        info!("Container runtime disabled by configuration");
        return None;
    }

    match DockerRuntime::connect_and_ping().await {
        Ok(runtime) => {
            info!("Connected to the Docker engine");
            Some(Arc::new(runtime))
        }
        Err(e) => {
            warn!("Container runtime unavailable, continuing without it: {}", e);
            None
        }
    }
}
