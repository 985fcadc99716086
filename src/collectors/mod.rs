pub mod disks;
pub mod platform;
pub mod services;
pub mod system;

use crate::error::{ProbeError, ProbeFailure};
use crate::snapshot::{format_uptime, round_to, CpuWordSize, HostSnapshot, TIMESTAMP_FORMAT};
use platform::{platform_name, PlatformProbe};
use std::path::PathBuf;
use std::sync::Arc;
use sysinfo::{System, SystemExt};
use tracing::debug;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Anything that can produce a fresh snapshot on demand.
pub trait SnapshotSource: Send {
    fn capture(&mut self) -> HostSnapshot;
}

/// Merges platform probes, the disk enumerator and the service checker into
/// one `HostSnapshot`. Each consumer owns its own assembler so CPU usage is
/// measured between that consumer's ticks.
pub struct Assembler {
    system: System,
    probe: Arc<dyn PlatformProbe>,
    services_file: PathBuf,
}

impl Assembler {
    pub fn new(probe: Arc<dyn PlatformProbe>, services_file: PathBuf) -> Self {
        let mut system = System::new();
        // baseline for the first usage delta
        system.refresh_cpu();
        Self {
            system,
            probe,
            services_file,
        }
    }

    pub fn collect(&mut self) -> HostSnapshot {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut errors = Vec::new();
        let probe = self.probe.as_ref();

        let host = system::read_host(&mut self.system);

        let host_name = match host.host_name {
            Some(name) => name,
            None => {
                let err = ProbeError::metric_unavailable("host_name", "system reported no host name");
                record(&mut errors, "host_name", &err);
                "localhost".to_string()
            }
        };

        let distribution_name = settle(&mut errors, "distribution_name", probe.distribution_name()).flatten();
        let cpu_model = settle(&mut errors, "cpu_model", probe.cpu_model());
        let arch = settle(&mut errors, "cpu_word_size", probe.machine_arch())
            .unwrap_or_else(|| std::env::consts::ARCH.to_string());

        let cpu_frequency_ghz = if host.cpu_frequency_mhz > 0 {
            Some(round_to(host.cpu_frequency_mhz as f64 / 1000.0, 1))
        } else {
            let err = ProbeError::metric_unavailable("cpu_frequency_ghz", "frequency reported as 0");
            record(&mut errors, "cpu_frequency_ghz", &err);
            None
        };

        let (buffer_mb, cache_mb) = match settle(&mut errors, "buffer_cache", probe.buffer_cache()) {
            Some(bc) => (
                Some(round_to(bc.buffer_bytes as f64 / MIB, 2)),
                Some(round_to(bc.cache_bytes as f64 / MIB, 2)),
            ),
            None => (None, None),
        };

        let memory_used_percent = if host.memory_total_bytes > 0 {
            let used = host
                .memory_total_bytes
                .saturating_sub(host.memory_available_bytes) as f64;
            round_to(used / host.memory_total_bytes as f64 * 100.0, 1)
        } else {
            0.0
        };

        let mounted = disks::mounted_partitions(&mut self.system, probe.family());
        let (partitions, partition_errors) = disks::enumerate_partitions(probe, &mounted);
        errors.extend(partition_errors);

        let (services, service_errors) = services::check_services(probe, &self.services_file);
        errors.extend(service_errors);

        HostSnapshot {
            timestamp,
            platform_name: platform_name(),
            platform_version: host.os_version,
            kernel_description: host.kernel_version,
            host_name,
            distribution_name,
            uptime_seconds: host.uptime_seconds,
            uptime_formatted: format_uptime(host.uptime_seconds),
            cpu_model,
            cpu_word_size: CpuWordSize::from_arch(&arch),
            cpu_frequency_ghz,
            cpu_core_count: host.cpu_core_count,
            cpu_usage_percent: round_to(host.cpu_usage_percent, 1),
            memory_total_gb: round_to(host.memory_total_bytes as f64 / GIB, 2),
            memory_free_gb: round_to(host.memory_free_bytes as f64 / GIB, 2),
            memory_used_gb: round_to(host.memory_used_bytes as f64 / GIB, 2),
            memory_used_percent,
            buffer_mb,
            cache_mb,
            partitions,
            services,
            errors,
        }
    }
}

impl SnapshotSource for Assembler {
    fn capture(&mut self) -> HostSnapshot {
        self.collect()
    }
}

fn settle<T>(errors: &mut Vec<ProbeFailure>, metric: &str, result: Result<T, ProbeError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            record(errors, metric, &err);
            None
        }
    }
}

fn record(errors: &mut Vec<ProbeFailure>, metric: &str, err: &ProbeError) {
    debug!(metric, error = %err, "metric unavailable this tick");
    errors.push(ProbeFailure::new(metric, err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::disks::MountedPartition;
    use crate::collectors::platform::{BufferCache, PartitionUsage, PlatformFamily};
    use crate::error::ProbeErrorKind;
    use crate::snapshot::RawServiceStatus;
    use std::fs;
    use sysinfo::DiskExt;
    use tempfile::tempdir;

    /// Probe whose external tools are all missing.
    struct BareProbe;

    impl PlatformProbe for BareProbe {
        fn family(&self) -> PlatformFamily {
            PlatformFamily::Posix
        }

        fn cpu_model(&self) -> Result<String, ProbeError> {
            Err(ProbeError::probe_unavailable("lscpu", "No such file or directory"))
        }

        fn machine_arch(&self) -> Result<String, ProbeError> {
            Ok("i686".to_string())
        }

        fn distribution_name(&self) -> Result<Option<String>, ProbeError> {
            Ok(None)
        }

        fn buffer_cache(&self) -> Result<BufferCache, ProbeError> {
            Err(ProbeError::metric_unavailable("buffer_cache", "absent"))
        }

        fn partition_usage(&self, _partition: &MountedPartition) -> Result<PartitionUsage, ProbeError> {
            Err(ProbeError::probe_unavailable("df -hP", "No such file or directory"))
        }

        fn service_status(&self, _name: &str) -> Result<RawServiceStatus, ProbeError> {
            Ok(RawServiceStatus::ExitCode(0))
        }
    }

    #[test]
    fn failures_null_fields_without_aborting() {
        let dir = tempdir().unwrap();
        let services = dir.path().join("services.yaml");
        fs::write(&services, "Linux:\n  web: nginx\n").unwrap();

        let mut assembler = Assembler::new(Arc::new(BareProbe), services);
        let snapshot = assembler.collect();

        assert_eq!(snapshot.cpu_model, None);
        assert_eq!(snapshot.cpu_word_size, CpuWordSize::Bits32);
        assert_eq!(snapshot.buffer_mb, None);
        assert_eq!(snapshot.cache_mb, None);
        assert_eq!(snapshot.services.len(), 1);
        assert!(snapshot
            .errors
            .iter()
            .any(|e| e.metric == "cpu_model" && e.kind == ProbeErrorKind::ProbeUnavailable));
        assert!(snapshot.partitions.iter().all(|p| p.capacity.is_none()));
    }

    #[test]
    fn partition_count_matches_enumeration() {
        let dir = tempdir().unwrap();
        let mut assembler = Assembler::new(Arc::new(BareProbe), dir.path().join("none.yaml"));
        let snapshot = assembler.collect();

        let mut system = System::new();
        system.refresh_disks_list();
        let devices: Vec<String> = system
            .disks()
            .iter()
            .map(|d| d.name().to_string_lossy().to_string())
            .collect();
        assert_eq!(snapshot.partitions.len(), devices.len());
        assert!(snapshot.services.is_empty());
    }

    #[test]
    fn consecutive_snapshots_share_identity() {
        let dir = tempdir().unwrap();
        let mut assembler = Assembler::new(Arc::new(BareProbe), dir.path().join("none.yaml"));
        let first = assembler.collect();
        let second = assembler.collect();
        assert_eq!(first.host_name, second.host_name);
        assert_eq!(first.platform_name, second.platform_name);
        assert_eq!(first.uptime_formatted, format_uptime(first.uptime_seconds));
        assert!(matches!(first.cpu_word_size, CpuWordSize::Bits32 | CpuWordSize::Bits64));
    }
}
