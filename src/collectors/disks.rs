use crate::collectors::platform::{PlatformFamily, PlatformProbe};
use crate::error::{ProbeError, ProbeFailure};
use crate::snapshot::PartitionInfo;
use sysinfo::{DiskExt, System, SystemExt};
use tracing::warn;

/// One entry of the authoritative mounted-partition list.
#[derive(Debug, Clone, PartialEq)]
pub struct MountedPartition {
    pub device: String,
    pub filesystem: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

pub fn mounted_partitions(system: &mut System, family: PlatformFamily) -> Vec<MountedPartition> {
    system.refresh_disks_list();
    system.refresh_disks();
    system
        .disks()
        .iter()
        .map(|d| {
            let mount_point = d.mount_point().to_string_lossy().to_string();
            // volume labels are not addressable on Windows; the drive root is
            let device = match family {
                PlatformFamily::Windows => mount_point.clone(),
                PlatformFamily::Posix => d.name().to_string_lossy().to_string(),
            };
            MountedPartition {
                device,
                filesystem: String::from_utf8_lossy(d.file_system()).to_string(),
                mount_point,
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
            }
        })
        .collect()
}

/// Computes usage for every partition. The result always has one entry per
/// input partition, in input order; a partition whose query fails keeps its
/// device and gets every other field nulled.
pub fn enumerate_partitions(
    probe: &dyn PlatformProbe,
    partitions: &[MountedPartition],
) -> (Vec<PartitionInfo>, Vec<ProbeFailure>) {
    let mut out = Vec::with_capacity(partitions.len());
    let mut failures = Vec::new();

    for (index, partition) in partitions.iter().enumerate() {
        match probe.partition_usage(partition) {
            Ok(usage) => out.push(PartitionInfo {
                device: partition.device.clone(),
                capacity: Some(usage.capacity),
                free: Some(usage.free),
                free_percent: Some(usage.free_percent),
                filesystem: Some(partition.filesystem.clone()),
                mount_point: usage.mount_point,
            }),
            Err(err) => {
                warn!(device = %partition.device, index, error = %err, "partition usage failed");
                let err = ProbeError::partial("partition", index, &err);
                failures.push(ProbeFailure::new(format!("partitions[{index}]"), &err));
                out.push(PartitionInfo::failed(partition.device.clone()));
            }
        }
    }

    (out, failures)
}
