//! System introspection helpers backing the node monitoring surface.

use serde::Serialize;
use sysinfo::System;

/// Point-in-time memory usage of the node host.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryStats {
    /// Bytes of memory in use.
    pub used_bytes: u64,
    /// Total bytes of memory available to the node.
    pub total_bytes: u64,
    /// Usage in the range `[0.0, 1.0]`.
    pub used_percent: f32,
}

impl MemoryStats {
    /// Refreshes memory readings from the operating system.
    ///
    /// Prefers cgroup limits when the node runs containerized, so the reported
    /// total reflects the container allowance rather than the host.
    pub fn from_system(system: &mut System) -> Self {
        system.refresh_memory_specifics(sysinfo::MemoryRefreshKind::nothing().with_ram());

        let (used_bytes, total_bytes) = match system.cgroup_limits() {
            Some(cgroup) => (cgroup.rss, cgroup.total_memory),
            None => (system.used_memory(), system.total_memory()),
        };

        let used_percent = used_bytes as f32 / total_bytes as f32;
        let used_percent = if used_percent.is_nan() {
            1.0
        } else {
            used_percent.clamp(0.0, 1.0)
        };

        Self {
            used_bytes,
            total_bytes,
            used_percent,
        }
    }
}

/// Renders a one-line human-readable summary of the host system.
pub fn system_summary(system: &mut System) -> String {
    system.refresh_cpu_list(sysinfo::CpuRefreshKind::nothing());

    let os = System::name().unwrap_or_else(|| "unknown".to_owned());
    let os_version = System::os_version().unwrap_or_else(|| "unknown".to_owned());
    let arch = System::cpu_arch();
    let cores = system.cpus().len();
    let load = System::load_average();

    format!(
        "{os} {os_version} {arch} @ {cores} cores, load average: {:.2} {:.2} {:.2}",
        load.one, load.five, load.fifteen
    )
}
