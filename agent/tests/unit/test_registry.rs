//! Node registry tests

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use fleetd::errors::FleetError;
use fleetd::models::{CloudProvider, Node, NodeFilter, NodeHealth, NodeStatus};
use fleetd::registry::{InMemoryNodeStore, NodeEvent, NodeRegistry, NodeStore};

use crate::support::new_node;

async fn backdate_heartbeat(store: &InMemoryNodeStore, id: &str, secs: i64) {
    store
        .update(
            id,
            Box::new(move |node: &mut Node| {
                node.last_heartbeat = Utc::now() - chrono::Duration::seconds(secs);
                Ok(())
            }),
        )
        .await
        .unwrap();
}

async fn status_of(registry: &NodeRegistry, id: &str) -> NodeStatus {
    registry.get_node(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_register_starts_initializing_with_zeroed_health() {
    let registry = NodeRegistry::in_memory();
    let node = registry
        .register_node(new_node("user-1", CloudProvider::Flyio))
        .await
        .unwrap();

    assert!(!node.id.is_empty());
    assert_eq!(node.status, NodeStatus::Initializing);
    assert_eq!(node.health, NodeHealth::default());
    assert_eq!(registry.get_node(&node.id).await.unwrap(), Some(node));
}

#[tokio::test]
async fn test_register_honors_caller_id_and_rejects_duplicates() {
    let registry = NodeRegistry::in_memory();
    let mut request = new_node("user-1", CloudProvider::Render);
    request.id = Some("node-a".to_string());

    let node = registry.register_node(request.clone()).await.unwrap();
    assert_eq!(node.id, "node-a");

    let err = registry.register_node(request).await.unwrap_err();
    assert!(matches!(err, FleetError::Conflict(_)));
}

#[tokio::test]
async fn test_register_requires_owner() {
    let registry = NodeRegistry::in_memory();
    let err = registry
        .register_node(new_node("", CloudProvider::Render))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::ValidationFailed(_)));
}

#[tokio::test]
async fn test_heartbeat_then_explicit_updates() {
    let registry = NodeRegistry::in_memory();
    let node = registry
        .register_node(new_node("user-1", CloudProvider::Railway))
        .await
        .unwrap();

    let ready = registry.record_heartbeat(&node.id).await.unwrap().unwrap();
    assert_eq!(ready.status, NodeStatus::Ready);
    assert!(ready.health.last_heartbeat_unix > 0);

    let busy = registry
        .update_node_status(&node.id, NodeStatus::Busy)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(busy.status, NodeStatus::Busy);

    let back = registry
        .update_node_status(&node.id, NodeStatus::Ready)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(back.status, NodeStatus::Ready);

    let err = registry
        .update_node_status(&node.id, NodeStatus::Initializing)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_removed_is_terminal() {
    let registry = NodeRegistry::in_memory();
    let node = registry
        .register_node(new_node("user-1", CloudProvider::Render))
        .await
        .unwrap();

    let removed = registry
        .apply_event(&node.id, NodeEvent::Remove)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.status, NodeStatus::Removed);

    assert!(registry.record_heartbeat(&node.id).await.is_err());
    assert!(registry
        .update_node_status(&node.id, NodeStatus::Ready)
        .await
        .is_err());

    let stored = registry.get_node(&node.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NodeStatus::Removed);
}

#[tokio::test]
async fn test_unknown_node_updates_are_none() {
    let registry = NodeRegistry::in_memory();
    assert!(registry
        .update_node_status("missing", NodeStatus::Ready)
        .await
        .unwrap()
        .is_none());
    assert!(registry
        .update_node_health("missing", NodeHealth::default())
        .await
        .unwrap()
        .is_none());
    assert!(!registry.remove_node("missing").await.unwrap());
}

#[tokio::test]
async fn test_user_nodes_filtered_and_newest_first() {
    let registry = NodeRegistry::in_memory();
    let first = registry
        .register_node(new_node("user-1", CloudProvider::Render))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = registry
        .register_node(new_node("user-1", CloudProvider::Vercel))
        .await
        .unwrap();
    registry
        .register_node(new_node("user-2", CloudProvider::Render))
        .await
        .unwrap();

    let all = registry
        .get_user_nodes("user-1", &NodeFilter::default())
        .await
        .unwrap();
    let ids: Vec<&str> = all.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

    let render = registry
        .get_nodes_by_provider("user-1", CloudProvider::Render)
        .await
        .unwrap();
    assert_eq!(render.len(), 1);
    assert_eq!(render[0].id, first.id);

    registry.record_heartbeat(&second.id).await.unwrap();
    let ready = registry
        .get_nodes_by_status("user-1", NodeStatus::Ready)
        .await
        .unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, second.id);
}

#[tokio::test]
async fn test_node_stats_average_health() {
    let registry = NodeRegistry::in_memory();
    let a = registry
        .register_node(new_node("user-1", CloudProvider::Render))
        .await
        .unwrap();
    let b = registry
        .register_node(new_node("user-1", CloudProvider::Flyio))
        .await
        .unwrap();

    for (id, cpu) in [(&a.id, 20.0), (&b.id, 40.0)] {
        registry
            .update_node_health(
                id,
                NodeHealth {
                    cpu_percent: cpu,
                    memory_percent: 50.0,
                    disk_percent: 10.0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    registry.record_heartbeat(&a.id).await.unwrap();

    let stats = registry.node_stats("user-1").await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_provider.get("render"), Some(&1));
    assert_eq!(stats.by_status.get("ready"), Some(&1));
    assert_eq!(stats.by_status.get("initializing"), Some(&1));
    assert!((stats.avg_health.cpu - 30.0).abs() < f64::EPSILON);
    assert!((stats.avg_health.memory - 50.0).abs() < f64::EPSILON);

    let empty = registry.node_stats("nobody").await.unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.avg_health.cpu, 0.0);
}

#[tokio::test]
async fn test_mark_stale_nodes_degrades_only_live_nodes() {
    let store = Arc::new(InMemoryNodeStore::new());
    let registry = NodeRegistry::new(store.clone());

    let stale = registry
        .register_node(new_node("user-1", CloudProvider::Render))
        .await
        .unwrap();
    let fresh = registry
        .register_node(new_node("user-1", CloudProvider::Render))
        .await
        .unwrap();
    let failed = registry
        .register_node(new_node("user-1", CloudProvider::Render))
        .await
        .unwrap();

    registry.record_heartbeat(&stale.id).await.unwrap();
    registry
        .update_node_status(&failed.id, NodeStatus::Failed)
        .await
        .unwrap();

    backdate_heartbeat(&store, &stale.id, 120).await;
    backdate_heartbeat(&store, &failed.id, 120).await;

    let marked = registry
        .mark_stale_nodes(Duration::from_secs(90))
        .await
        .unwrap();
    assert_eq!(marked, vec![stale.id.clone()]);

    assert_eq!(status_of(&registry, &stale.id).await, NodeStatus::Degraded);
    assert_eq!(status_of(&registry, &fresh.id).await, NodeStatus::Initializing);
    assert_eq!(status_of(&registry, &failed.id).await, NodeStatus::Failed);

    // A heartbeat recovers the degraded node
    let recovered = registry.record_heartbeat(&stale.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, NodeStatus::Ready);
}

#[tokio::test]
async fn test_remove_node() {
    let registry = NodeRegistry::in_memory();
    let node = registry
        .register_node(new_node("user-1", CloudProvider::Render))
        .await
        .unwrap();

    assert!(registry.remove_node(&node.id).await.unwrap());
    assert!(registry.get_node(&node.id).await.unwrap().is_none());
    assert!(!registry.remove_node(&node.id).await.unwrap());
}
