//! Node agent tests against an in-process container runtime

use std::sync::atomic::Ordering;
use std::time::Duration;

use fleetd::errors::FleetError;
use fleetd::models::{InstanceStatus, NodeHealthStatus};
use fleetd::runtime::{ContainerStatsSnapshot, RestartPolicy};

use fleetd::agent::AgentConfig;

use crate::support::{agent_with, agent_with_config, deployment, FakeRuntime};

#[tokio::test]
async fn test_register_application_builds_pending_instance() {
    let agent = agent_with(None);
    let instance = agent
        .register_application(&deployment("nodejs", Some(3000)))
        .await
        .unwrap();

    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.deployment_id, "dep-1");
    assert!(instance.container.id.is_none());
    assert_eq!(instance.manifest.resources.memory_limit_mb, 512);
    assert_eq!(instance.manifest.resources.cpu_limit, 1.0);
    assert_eq!(
        instance.manifest.env_vars.get("NODE_ENV").map(String::as_str),
        Some("production")
    );
    assert_eq!(instance.ports.len(), 1);
    assert_eq!(instance.ports[0].container_port, 3000);
    assert_eq!(instance.ports[0].host_port, 3000);

    assert_eq!(agent.get_application(&instance.id).await.unwrap(), instance);
}

#[tokio::test]
async fn test_list_and_update_applications() {
    let agent = agent_with(None);
    let first = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = agent
        .register_application(&deployment("python", None))
        .await
        .unwrap();

    let ids: Vec<String> = agent
        .list_applications()
        .await
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);

    let updated = agent
        .update_application_status(&second.id, InstanceStatus::Stopped)
        .await
        .unwrap();
    assert_eq!(updated.status, InstanceStatus::Stopped);
    assert!(updated.updated_at >= second.updated_at);

    assert!(agent
        .update_application_status("missing", InstanceStatus::Running)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_container_calls_without_runtime() {
    let agent = agent_with(None);
    assert!(!agent.has_runtime());
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();

    assert!(matches!(
        agent.start_container(&instance.id).await,
        Err(FleetError::RuntimeUnavailable(_))
    ));
    assert_eq!(
        agent.get_application(&instance.id).await.unwrap().status,
        InstanceStatus::Pending
    );
    assert!(matches!(
        agent.container_logs(&instance.id, 10).await,
        Err(FleetError::RuntimeUnavailable(_))
    ));
    assert!(matches!(
        agent.sample_once().await,
        Err(FleetError::RuntimeUnavailable(_))
    ));

    // Start succeeds but there is nothing to sample
    agent.start().unwrap();
    assert!(!agent.is_running());
    agent.stop().await.unwrap();

    // Removal still works on metadata alone
    agent.remove_application(&instance.id).await.unwrap();
    assert!(agent.list_applications().await.is_empty());
}

#[tokio::test]
async fn test_start_container_provisions_and_runs() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", Some(3000)))
        .await
        .unwrap();

    let started = agent.start_container(&instance.id).await.unwrap();
    assert_eq!(started.status, InstanceStatus::Running);
    assert_eq!(started.container_id(), Some("c1"));
    assert!(started.container.started_at > 0);
    assert!(started.error_message.is_none());

    assert_eq!(
        runtime.calls(),
        vec![
            "pull node:18-alpine".to_string(),
            format!("create fleetd-{}", instance.id),
            "start c1".to_string(),
        ]
    );

    let specs = runtime.specs.lock().unwrap();
    let spec = &specs[0];
    assert_eq!(spec.memory_bytes, Some(512 * 1024 * 1024));
    assert_eq!(spec.nano_cpus, Some(1_000_000_000));
    assert_eq!(spec.restart_policy, RestartPolicy::UnlessStopped);
    assert!(spec
        .env
        .contains(&("NODE_ENV".to_string(), "production".to_string())));
    assert_eq!(spec.ports[0].host_port, 3000);
}

#[tokio::test]
async fn test_start_failure_cleans_up_and_keeps_status() {
    let runtime = FakeRuntime::new();
    runtime.fail_start.store(true, Ordering::SeqCst);
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();

    let err = agent.start_container(&instance.id).await.unwrap_err();
    assert!(matches!(err, FleetError::RuntimeOperationFailed(_)));
    assert!(runtime.calls().contains(&"remove c1 true".to_string()));

    let after = agent.get_application(&instance.id).await.unwrap();
    assert_eq!(after.status, InstanceStatus::Pending);
    assert!(after.container.id.is_none());
    assert!(after
        .error_message
        .as_deref()
        .unwrap()
        .contains("port is already allocated"));
}

#[tokio::test]
async fn test_pull_failure_stops_before_create() {
    let runtime = FakeRuntime::new();
    runtime.fail_pull.store(true, Ordering::SeqCst);
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("cobol", None))
        .await
        .unwrap();

    assert!(agent.start_container(&instance.id).await.is_err());
    assert_eq!(runtime.calls(), vec!["pull alpine:latest".to_string()]);
    assert_eq!(
        agent.get_application(&instance.id).await.unwrap().status,
        InstanceStatus::Pending
    );
}

#[tokio::test]
async fn test_unreachable_runtime_keeps_instance_pending() {
    let runtime = FakeRuntime::new();
    runtime.disconnected.store(true, Ordering::SeqCst);
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();

    let err = agent.start_container(&instance.id).await.unwrap_err();
    assert!(matches!(err, FleetError::RuntimeUnavailable(_)));
    assert_eq!(runtime.calls(), vec!["pull node:18-alpine".to_string()]);
    assert_eq!(
        agent.get_application(&instance.id).await.unwrap().status,
        InstanceStatus::Pending
    );

    // Once the engine is back the same instance starts normally
    runtime.disconnected.store(false, Ordering::SeqCst);
    let started = agent.start_container(&instance.id).await.unwrap();
    assert_eq!(started.status, InstanceStatus::Running);
    assert!(started.error_message.is_none());
}

#[tokio::test]
async fn test_oversized_memory_limit_is_rejected() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime.clone()));
    let mut d = deployment("nodejs", None);
    d.resources.memory_limit_mb = u64::MAX / 2;
    let instance = agent.register_application(&d).await.unwrap();

    let err = agent.start_container(&instance.id).await.unwrap_err();
    assert!(matches!(err, FleetError::ValidationFailed(_)));
    assert!(runtime.calls().is_empty());
    assert_eq!(
        agent.get_application(&instance.id).await.unwrap().status,
        InstanceStatus::Pending
    );
}

#[tokio::test]
async fn test_instance_timestamps_share_one_unit() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();
    let started = agent.start_container(&instance.id).await.unwrap();

    assert!(started.container.started_at >= instance.created_at);
    assert!((started.updated_at - started.container.started_at).abs() < 1_000);

    agent.sample_once().await.unwrap();
    let sampled = agent.get_application(&instance.id).await.unwrap();
    assert!(sampled.metrics.timestamp >= started.container.started_at);
    assert!((sampled.updated_at - sampled.metrics.timestamp).abs() < 1_000);
}

#[tokio::test]
async fn test_operations_need_a_container() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();

    assert!(matches!(
        agent.stop_container(&instance.id).await,
        Err(FleetError::NoContainer(_))
    ));
    assert!(matches!(
        agent.restart_container(&instance.id).await,
        Err(FleetError::NoContainer(_))
    ));
    assert!(matches!(
        agent.container_logs(&instance.id, 50).await,
        Err(FleetError::NoContainer(_))
    ));

    // Nothing to remove
    agent.remove_container(&instance.id).await.unwrap();
    assert!(runtime.calls().is_empty());

    assert!(agent.start_container("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_stop_restart_logs_and_remove() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();
    agent.start_container(&instance.id).await.unwrap();

    let stopped = agent.stop_container(&instance.id).await.unwrap();
    assert_eq!(stopped.status, InstanceStatus::Stopped);
    assert!(stopped.container.stopped_at > 0);
    assert_eq!(stopped.metrics.health_status, "stopped");
    assert!(runtime.calls().contains(&"stop c1 10".to_string()));

    let restarted = agent.restart_container(&instance.id).await.unwrap();
    assert_eq!(restarted.status, InstanceStatus::Running);

    let logs = agent.container_logs(&instance.id, 100).await.unwrap();
    assert!(logs.contains("hello"));
    assert!(runtime.calls().contains(&"logs c1 100".to_string()));

    agent.remove_container(&instance.id).await.unwrap();
    let calls = runtime.calls();
    let stop_at = calls.iter().rposition(|c| c == "stop c1 10").unwrap();
    let remove_at = calls.iter().position(|c| c == "remove c1 true").unwrap();
    assert!(stop_at < remove_at);

    let removed = agent.get_application(&instance.id).await.unwrap();
    assert!(removed.container.id.is_none());
    assert_eq!(removed.status, InstanceStatus::Stopped);
}

#[tokio::test]
async fn test_remove_application_removes_container() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();
    agent.start_container(&instance.id).await.unwrap();

    agent.remove_application(&instance.id).await.unwrap();
    assert!(runtime.calls().contains(&"remove c1 true".to_string()));
    assert!(agent.get_application(&instance.id).await.unwrap_err().is_not_found());
    assert!(agent.remove_application(&instance.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_sample_once_tracks_container_state() {
    let runtime = FakeRuntime::new();
    runtime
        .mem_total_bytes
        .store(2 * 1024 * 1024 * 1024, Ordering::SeqCst);
    *runtime.stats.lock().unwrap() = ContainerStatsSnapshot {
        memory_usage_bytes: 256 * 1024 * 1024,
        memory_limit_bytes: 512 * 1024 * 1024,
        ..Default::default()
    };
    let agent = agent_with(Some(runtime.clone()));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let instance = agent
            .register_application(&deployment("nodejs", None))
            .await
            .unwrap();
        agent.start_container(&instance.id).await.unwrap();
        ids.push(instance.id);
    }

    // c1 keeps running, c2 crashed, c3 exited cleanly
    runtime.set_state("c2", false, 137);
    runtime.set_state("c3", false, 0);

    agent.sample_once().await.unwrap();

    let healthy = agent.get_application(&ids[0]).await.unwrap();
    assert_eq!(healthy.status, InstanceStatus::Running);
    assert_eq!(healthy.metrics.health_status, "healthy");
    assert!((healthy.metrics.memory_usage_mb - 256.0).abs() < 1e-9);
    assert!((healthy.metrics.memory_percent - 50.0).abs() < 1e-9);

    let crashed = agent.get_application(&ids[1]).await.unwrap();
    assert_eq!(crashed.status, InstanceStatus::Failed);
    assert_eq!(
        crashed.error_message.as_deref(),
        Some("Container exited with code 137")
    );
    assert_eq!(crashed.metrics.health_status, "unhealthy");
    assert!(crashed.container.stopped_at > 0);

    let exited = agent.get_application(&ids[2]).await.unwrap();
    assert_eq!(exited.status, InstanceStatus::Stopped);
    assert_eq!(exited.metrics.health_status, "stopped");

    let health = agent.get_node_health();
    assert_eq!(health.containers.total, 3);
    assert_eq!(health.containers.running, 1);
    assert_eq!(health.containers.failed, 1);
    assert_eq!(health.containers.stopped, 1);
    assert!((health.system.total_memory_mb - 2048.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_inspect_errors_escalate_to_failed() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();
    agent.start_container(&instance.id).await.unwrap();

    runtime.fail_inspect("c1", "engine hiccup");
    agent.sample_once().await.unwrap();
    let failing = agent.get_application(&instance.id).await.unwrap();
    assert_eq!(failing.status, InstanceStatus::Failing);
    assert!(failing
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Failed to inspect container"));

    agent.sample_once().await.unwrap();
    let failed = agent.get_application(&instance.id).await.unwrap();
    assert_eq!(failed.status, InstanceStatus::Failed);
    assert_eq!(failed.container.stopped_at, 0);
}

#[tokio::test]
async fn test_failing_instance_recovers() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();
    agent.start_container(&instance.id).await.unwrap();

    runtime.fail_inspect("c1", "engine hiccup");
    agent.sample_once().await.unwrap();
    runtime.set_state("c1", true, 0);
    agent.sample_once().await.unwrap();

    let recovered = agent.get_application(&instance.id).await.unwrap();
    assert_eq!(recovered.status, InstanceStatus::Running);
    assert!(recovered.error_message.is_none());
    assert_eq!(recovered.metrics.health_status, "healthy");
}

#[tokio::test]
async fn test_stats_failure_keeps_previous_metrics() {
    let runtime = FakeRuntime::new();
    runtime.fail_stats.store(true, Ordering::SeqCst);
    let agent = agent_with(Some(runtime.clone()));
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();
    let started = agent.start_container(&instance.id).await.unwrap();

    agent.sample_once().await.unwrap();
    let sampled = agent.get_application(&instance.id).await.unwrap();
    assert_eq!(sampled.status, InstanceStatus::Running);
    assert_eq!(sampled.metrics.cpu_percent, started.metrics.cpu_percent);
    assert_eq!(sampled.metrics.memory_usage_mb, 0.0);
}

#[tokio::test]
async fn test_node_health_before_first_sample() {
    let agent = agent_with(None);
    let health = agent.get_node_health();
    assert!(health.timestamp > 0);
    assert_eq!(health.containers.total, 0);

    let snapshot = NodeHealthStatus {
        timestamp: 1,
        uptime_seconds: 42,
        ..Default::default()
    };
    agent.update_node_health(snapshot.clone());
    assert_eq!(agent.get_node_health(), snapshot);
}

#[tokio::test]
async fn test_sampling_loop_start_stop() {
    let runtime = FakeRuntime::new();
    let agent = agent_with(Some(runtime));

    agent.start().unwrap();
    assert!(agent.is_running());
    assert!(matches!(agent.start(), Err(FleetError::AlreadyRunning(_))));

    agent.stop().await.unwrap();
    assert!(!agent.is_running());
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_lets_inflight_sampling_finish() {
    let runtime = FakeRuntime::new();
    *runtime.stats.lock().unwrap() = ContainerStatsSnapshot {
        memory_usage_bytes: 256 * 1024 * 1024,
        memory_limit_bytes: 512 * 1024 * 1024,
        ..Default::default()
    };
    let agent = agent_with_config(
        Some(runtime.clone()),
        AgentConfig {
            sample_interval: Duration::from_millis(10),
            ..Default::default()
        },
    );
    let instance = agent
        .register_application(&deployment("nodejs", None))
        .await
        .unwrap();
    agent.start_container(&instance.id).await.unwrap();
    runtime.set_stats_delay(Duration::from_millis(200));

    agent.start().unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while runtime.stats_started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    agent.stop().await.unwrap();
    assert_eq!(
        runtime.stats_finished.load(Ordering::SeqCst),
        runtime.stats_started.load(Ordering::SeqCst)
    );

    // The pass that was under way committed its sample
    let sampled = agent.get_application(&instance.id).await.unwrap();
    assert!((sampled.metrics.memory_usage_mb - 256.0).abs() < 1e-9);
}
