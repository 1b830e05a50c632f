//! Host-level system metrics

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

/// Point-in-time host metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    /// CPU usage percentage (0-100)
    pub cpu_percent: f64,

    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,

    /// Disk usage percentage across all mounted disks
    pub disk_percent: f64,

    pub uptime_secs: u64,
    pub cpu_count: usize,
    pub hostname: String,
}

/// Keeps the `System` handle between samples so CPU usage is measured over
/// the interval since the previous sample.
pub struct HostSampler {
    system: System,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }

    /// Refresh and read the host counters. Blocking; call from a blocking task.
    pub fn sample(&mut self) -> HostMetrics {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let disks = Disks::new_with_refreshed_list();
        let (disk_used, disk_total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
            (
                used + disk.total_space().saturating_sub(disk.available_space()),
                total + disk.total_space(),
            )
        });

        HostMetrics {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            memory_used_bytes: self.system.used_memory(),
            memory_total_bytes: self.system.total_memory(),
            disk_percent: percent(disk_used, disk_total),
            uptime_secs: System::uptime(),
            cpu_count: self.system.cpus().len(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// `part / whole × 100`, 0 when `whole` is 0
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}
