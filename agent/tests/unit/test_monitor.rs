//! Health monitor tests

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_test::assert_ok;

use fleetd::models::{CloudProvider, Node, NodeHealth, NodeStatus};
use fleetd::monitor::{HealthMonitor, MonitorConfig};
use fleetd::registry::{InMemoryNodeStore, NodeRegistry, NodeStore};

use crate::support::{new_node, ScriptedProbe};

struct Fixture {
    store: Arc<InMemoryNodeStore>,
    registry: Arc<NodeRegistry>,
    probe: Arc<ScriptedProbe>,
    monitor: HealthMonitor,
}

fn fixture(config: MonitorConfig) -> Fixture {
    let store = Arc::new(InMemoryNodeStore::new());
    let registry = Arc::new(NodeRegistry::new(store.clone()));
    let probe = ScriptedProbe::new();
    let monitor = HealthMonitor::new(config, registry.clone(), probe.clone());
    Fixture {
        store,
        registry,
        probe,
        monitor,
    }
}

async fn ready_node(registry: &NodeRegistry) -> Node {
    let node = registry
        .register_node(new_node("user-1", CloudProvider::Render))
        .await
        .unwrap();
    registry.record_heartbeat(&node.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_failed_probes_escalate_and_heartbeat_recovers() {
    let f = fixture(MonitorConfig::default());
    let node = ready_node(&f.registry).await;
    f.probe.set_down(&node.id, true);

    let first = f.monitor.check_node(&node.id).await.unwrap().unwrap();
    assert!(!first.healthy);
    assert_eq!(first.status, NodeStatus::Degraded);
    assert!(first.error.as_deref().unwrap().contains("unreachable"));

    let second = f.monitor.check_node(&node.id).await.unwrap().unwrap();
    assert_eq!(second.status, NodeStatus::Failed);

    // A healthy probe alone does not revive a failed node
    f.probe.set_down(&node.id, false);
    let probed = f.monitor.check_node(&node.id).await.unwrap().unwrap();
    assert!(probed.healthy);
    assert_eq!(probed.status, NodeStatus::Failed);

    // Heartbeat brings it back to degraded, a healthy probe to ready
    f.registry.record_heartbeat(&node.id).await.unwrap();
    let recovered = f.monitor.check_node(&node.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, NodeStatus::Ready);
}

#[tokio::test]
async fn test_result_carries_recorded_health() {
    let f = fixture(MonitorConfig::default());
    let node = ready_node(&f.registry).await;
    f.registry
        .update_node_health(
            &node.id,
            NodeHealth {
                cpu_percent: 12.5,
                memory_percent: 40.0,
                disk_percent: 70.0,
                uptime_seconds: 3600,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = f.monitor.check_node(&node.id).await.unwrap().unwrap();
    assert!(result.healthy);
    assert_eq!(result.status, NodeStatus::Ready);
    assert_eq!(result.cpu_percent, 12.5);
    assert_eq!(result.memory_percent, 40.0);
    assert_eq!(result.disk_percent, 70.0);
    assert_eq!(result.uptime, 3600);
    assert!(result.error.is_none());

    assert_eq!(f.monitor.get_node_health_history(&node.id), Some(result));
}

#[tokio::test]
async fn test_unknown_node_is_none() {
    let f = fixture(MonitorConfig::default());
    assert!(f.monitor.check_node("missing").await.unwrap().is_none());
    assert!(f.monitor.get_node_health_history("missing").is_none());
    assert_eq!(f.monitor.stats().total_checks, 0);
}

#[tokio::test]
async fn test_node_removed_during_check_is_not_recorded() {
    let f = fixture(MonitorConfig::default());
    let node = ready_node(&f.registry).await;
    f.probe.set_delay(Duration::from_millis(100));

    let (result, removed) = tokio::join!(f.monitor.check_node(&node.id), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.registry.remove_node(&node.id).await.unwrap()
    });

    assert!(removed);
    assert!(result.unwrap().is_none());
    assert!(f.monitor.get_node_health_history(&node.id).is_none());
    assert_eq!(f.monitor.stats().total_checks, 0);
}

#[tokio::test]
async fn test_stats() {
    let f = fixture(MonitorConfig::default());
    let empty = f.monitor.stats();
    assert_eq!(empty.total_checks, 0);
    assert_eq!(empty.success_rate, 1.0);
    assert_eq!(empty.avg_response_time_ms, 0.0);

    let up = ready_node(&f.registry).await;
    let down = ready_node(&f.registry).await;
    f.probe.set_down(&down.id, true);

    f.monitor.check_node(&up.id).await.unwrap();
    f.monitor.check_node(&down.id).await.unwrap();

    let stats = f.monitor.stats();
    assert_eq!(stats.total_checks, 2);
    assert_eq!(stats.success_rate, 0.5);
}

#[tokio::test]
async fn test_probe_timeout_counts_as_failure() {
    let f = fixture(MonitorConfig {
        timeout: Duration::from_millis(20),
        ..Default::default()
    });
    let node = ready_node(&f.registry).await;
    f.probe.set_delay(Duration::from_millis(500));

    let result = f.monitor.check_node(&node.id).await.unwrap().unwrap();
    assert!(!result.healthy);
    assert_eq!(result.status, NodeStatus::Degraded);
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert!(result.response_time_ms < 500);
}

#[tokio::test]
async fn test_sweep_marks_stale_nodes() {
    let f = fixture(MonitorConfig::default());
    let stale = ready_node(&f.registry).await;
    let fresh = ready_node(&f.registry).await;

    f.store
        .update(
            &stale.id,
            Box::new(|node: &mut Node| {
                node.last_heartbeat = Utc::now() - chrono::Duration::seconds(300);
                Ok(())
            }),
        )
        .await
        .unwrap();

    f.monitor.sweep().await.unwrap();

    // Reachable but silent nodes stay degraded
    let stale = f.registry.get_node(&stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, NodeStatus::Degraded);
    let fresh = f.registry.get_node(&fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, NodeStatus::Ready);

    assert_eq!(f.monitor.stats().total_checks, 2);
}

#[tokio::test]
async fn test_loop_start_stop() {
    let f = fixture(MonitorConfig {
        check_interval: Duration::from_millis(10),
        ..Default::default()
    });
    let node = ready_node(&f.registry).await;

    assert_ok!(f.monitor.start());
    assert_ok!(f.monitor.start());
    assert!(f.monitor.is_running());

    tokio::time::timeout(Duration::from_secs(2), async {
        while f.monitor.stats().total_checks < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(f.monitor.get_node_health_history(&node.id).is_some());

    assert_ok!(f.monitor.stop().await);
    assert!(!f.monitor.is_running());
    assert_ok!(f.monitor.stop().await);
}
