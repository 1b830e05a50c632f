use std::collections::HashMap;

use bollard::models::{ContainerNetworkStats, ContainerStatsResponse, PortMap};

use crate::runtime::{ContainerStatsSnapshot, PortBinding};

pub(crate) type ExposedPorts = HashMap<String, HashMap<(), ()>>;

/// Image used when a runtime tag has no entry in the table
pub const FALLBACK_IMAGE: &str = "alpine:latest";

const RUNTIME_IMAGES: &[(&str, &str)] = &[
    ("nodejs", "node:18-alpine"),
    ("python", "python:3.11-slim"),
    ("go", "golang:1.21-alpine"),
    ("ruby", "ruby:3.2-alpine"),
    ("php", "php:8.2-fpm-alpine"),
    ("java", "openjdk:17-alpine"),
    ("rust", "rust:1.75-alpine"),
    ("deno", "denoland/deno:alpine"),
];

/// Resolve the container image for a runtime tag
pub fn image_for_runtime(runtime: &str) -> &'static str {
    RUNTIME_IMAGES
        .iter()
        .find(|(tag, _)| *tag == runtime)
        .map(|(_, image)| *image)
        .unwrap_or(FALLBACK_IMAGE)
}

pub(crate) fn format_env(env: &[(String, String)]) -> Option<Vec<String>> {
    if env.is_empty() {
        None
    } else {
        Some(env.iter().map(|(k, v)| format!("{k}={v}")).collect())
    }
}

pub(crate) fn build_ports(ports: &[PortBinding]) -> (Option<PortMap>, Option<ExposedPorts>) {
    if ports.is_empty() {
        return (None, None);
    }

    let mut port_bindings: PortMap = HashMap::new();
    let mut exposed_ports: ExposedPorts = HashMap::new();

    for mapping in ports {
        let key = format!("{}/{}", mapping.container_port, mapping.protocol.as_str());
        exposed_ports.entry(key.clone()).or_default();

        let entry = port_bindings.entry(key).or_insert_with(|| Some(Vec::new()));
        if let Some(bindings) = entry.as_mut() {
            bindings.push(bollard::models::PortBinding {
                host_ip: mapping.host_ip.clone(),
                host_port: Some(mapping.host_port.to_string()),
            });
        }
    }

    (Some(port_bindings), Some(exposed_ports))
}

pub(crate) fn stats_snapshot(stats: &ContainerStatsResponse) -> ContainerStatsSnapshot {
    let cpu = stats.cpu_stats.as_ref();
    let pre = stats.precpu_stats.as_ref();

    let cpu_total_usage = cpu
        .and_then(|c| c.cpu_usage.as_ref())
        .and_then(|u| u.total_usage)
        .unwrap_or_default();
    let precpu_total_usage = pre
        .and_then(|c| c.cpu_usage.as_ref())
        .and_then(|u| u.total_usage)
        .unwrap_or_default();

    let online_cpus = cpu
        .and_then(|c| {
            c.online_cpus.or_else(|| {
                c.cpu_usage
                    .as_ref()?
                    .percpu_usage
                    .as_ref()
                    .map(|v| v.len() as u32)
            })
        })
        .unwrap_or(1);

    let memory = stats.memory_stats.as_ref();

    ContainerStatsSnapshot {
        cpu_total_usage,
        precpu_total_usage,
        system_cpu_usage: cpu.and_then(|c| c.system_cpu_usage).unwrap_or_default(),
        presystem_cpu_usage: pre.and_then(|c| c.system_cpu_usage).unwrap_or_default(),
        online_cpus,
        memory_usage_bytes: memory.and_then(|m| m.usage).unwrap_or_default(),
        memory_limit_bytes: memory.and_then(|m| m.limit).unwrap_or_default(),
        network_rx_bytes: network_bytes(stats, |net| net.rx_bytes),
        network_tx_bytes: network_bytes(stats, |net| net.tx_bytes),
    }
}

pub(crate) fn network_bytes(
    stats: &ContainerStatsResponse,
    selector: impl Fn(&ContainerNetworkStats) -> Option<u64>,
) -> u64 {
    stats
        .networks
        .as_ref()
        .map(|map| map.values().filter_map(selector).sum())
        .unwrap_or_default()
}

/// CPU usage across all cores, 0 when either delta is zero
pub fn calculate_cpu_percent(stats: &ContainerStatsSnapshot) -> f64 {
    let cpu_delta = stats
        .cpu_total_usage
        .saturating_sub(stats.precpu_total_usage);
    let system_delta = stats
        .system_cpu_usage
        .saturating_sub(stats.presystem_cpu_usage);

    if cpu_delta == 0 || system_delta == 0 {
        return 0.0;
    }

    (cpu_delta as f64 / system_delta as f64) * stats.online_cpus.max(1) as f64 * 100.0
}

/// Memory usage relative to the container limit, 0 without a limit
pub fn calculate_memory_percent(stats: &ContainerStatsSnapshot) -> f64 {
    if stats.memory_limit_bytes == 0 {
        return 0.0;
    }
    stats.memory_usage_bytes as f64 / stats.memory_limit_bytes as f64 * 100.0
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}
