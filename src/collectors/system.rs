use sysinfo::{CpuExt, System, SystemExt};

/// Host-level values that the native system API reports uniformly on every
/// platform.
#[derive(Debug, Clone)]
pub struct HostReadings {
    pub host_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub uptime_seconds: u64,
    pub cpu_core_count: usize,
    pub cpu_usage_percent: f64,
    pub cpu_frequency_mhz: u64,
    pub memory_total_bytes: u64,
    pub memory_free_bytes: u64,
    pub memory_available_bytes: u64,
    pub memory_used_bytes: u64,
}

/// Refreshes CPU and memory counters and reads them. CPU usage is measured
/// since the previous refresh of the same `System`.
pub fn read_host(system: &mut System) -> HostReadings {
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_core_count = system.cpus().len();
    let cpu_usage_percent = if cpu_core_count == 0 {
        0.0
    } else {
        system.global_cpu_info().cpu_usage() as f64
    };
    let cpu_frequency_mhz = system
        .cpus()
        .iter()
        .map(|c| c.frequency())
        .max()
        .unwrap_or(0);

    HostReadings {
        host_name: system.host_name(),
        os_version: system.os_version(),
        kernel_version: system.kernel_version(),
        uptime_seconds: system.uptime(),
        cpu_core_count,
        cpu_usage_percent,
        cpu_frequency_mhz,
        memory_total_bytes: system.total_memory(),
        memory_free_bytes: system.free_memory(),
        memory_available_bytes: system.available_memory(),
        memory_used_bytes: system.used_memory(),
    }
}
