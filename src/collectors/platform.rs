use crate::collectors::disks::MountedPartition;
use crate::error::ProbeError;
use crate::snapshot::{round_to, RawServiceStatus};
use std::fs;
use std::process::Command;
use std::sync::Arc;
use sysinfo::{System, SystemExt};
use tracing::debug;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Posix,
    Windows,
}

impl PlatformFamily {
    pub fn detect() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    /// Section of the services file that declares services for this family.
    pub fn services_section(self) -> &'static str {
        match self {
            Self::Posix => "Linux",
            Self::Windows => "Windows",
        }
    }
}

/// System name in the `uname -s` spelling.
pub fn platform_name() -> String {
    match std::env::consts::OS {
        "linux" => "Linux".to_string(),
        "windows" => "Windows".to_string(),
        "macos" => "Darwin".to_string(),
        "freebsd" => "FreeBSD".to_string(),
        "openbsd" => "OpenBSD".to_string(),
        "netbsd" => "NetBSD".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferCache {
    pub buffer_bytes: u64,
    pub cache_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionUsage {
    pub capacity: String,
    pub free: String,
    pub free_percent: f64,
    pub mount_point: Option<String>,
}

/// OS-specific metric extraction. Each call is independent and reports its
/// own failure; callers decide what to null.
pub trait PlatformProbe: Send + Sync {
    fn family(&self) -> PlatformFamily;

    fn cpu_model(&self) -> Result<String, ProbeError>;

    /// Machine architecture identifier such as `x86_64`, `AMD64` or `i686`.
    fn machine_arch(&self) -> Result<String, ProbeError>;

    /// `Ok(None)` where distributions do not apply.
    fn distribution_name(&self) -> Result<Option<String>, ProbeError>;

    fn buffer_cache(&self) -> Result<BufferCache, ProbeError>;

    fn partition_usage(&self, partition: &MountedPartition) -> Result<PartitionUsage, ProbeError>;

    fn service_status(&self, name: &str) -> Result<RawServiceStatus, ProbeError>;
}

pub fn probe_for(family: PlatformFamily) -> Arc<dyn PlatformProbe> {
    match family {
        PlatformFamily::Posix => Arc::new(PosixProbe::new()),
        PlatformFamily::Windows => Arc::new(WindowsProbe),
    }
}

pub struct PosixProbe {
    os: &'static str,
}

impl PosixProbe {
    pub fn new() -> Self {
        Self {
            os: std::env::consts::OS,
        }
    }
}

impl Default for PosixProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformProbe for PosixProbe {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Posix
    }

    fn cpu_model(&self) -> Result<String, ProbeError> {
        let text = run_command("lscpu", &[], &[("LC_ALL", "C")])?;
        parse_lscpu_model(&text)
            .ok_or_else(|| ProbeError::metric_unavailable("cpu_model", "no `Model name` in lscpu output"))
    }

    fn machine_arch(&self) -> Result<String, ProbeError> {
        let text = run_command("uname", &["-m"], &[])?;
        let arch = text.trim();
        if arch.is_empty() {
            return Err(ProbeError::metric_unavailable("cpu_word_size", "uname -m printed nothing"));
        }
        Ok(arch.to_string())
    }

    fn distribution_name(&self) -> Result<Option<String>, ProbeError> {
        if self.os != "linux" {
            return Ok(None);
        }
        System::new()
            .name()
            .map(Some)
            .ok_or_else(|| ProbeError::metric_unavailable("distribution_name", "no os-release NAME"))
    }

    fn buffer_cache(&self) -> Result<BufferCache, ProbeError> {
        let text = fs::read_to_string("/proc/meminfo").map_err(|err| {
            ProbeError::metric_unavailable("buffer_cache", format!("/proc/meminfo: {err}"))
        })?;
        parse_meminfo_buffer_cache(&text).ok_or_else(|| {
            ProbeError::metric_unavailable("buffer_cache", "no Buffers/Cached counters")
        })
    }

    fn partition_usage(&self, partition: &MountedPartition) -> Result<PartitionUsage, ProbeError> {
        // some platforms name disks by label rather than device node
        let target: &str = if partition.device.starts_with('/') {
            &partition.device
        } else {
            &partition.mount_point
        };
        let text = run_command("df", &["-hP", target], &[("LC_ALL", "C")])?;
        parse_df_output(&text, &partition.mount_point).ok_or_else(|| {
            ProbeError::metric_unavailable(
                "partition",
                format!("unexpected df output for {}", partition.device),
            )
        })
    }

    fn service_status(&self, name: &str) -> Result<RawServiceStatus, ProbeError> {
        let status = Command::new("systemctl")
            .args(["is-active", "--quiet", name])
            .status()
            .map_err(|err| ProbeError::probe_unavailable("systemctl is-active", err.to_string()))?;
        // raw code kept: 3 (inactive) and 4 (no such unit) mean different things
        status
            .code()
            .map(RawServiceStatus::ExitCode)
            .ok_or_else(|| ProbeError::probe_unavailable("systemctl is-active", "terminated by signal"))
    }
}

pub struct WindowsProbe;

impl PlatformProbe for WindowsProbe {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Windows
    }

    fn cpu_model(&self) -> Result<String, ProbeError> {
        let wmic = run_command("wmic", &["cpu", "get", "name"], &[])
            .and_then(|text| {
                parse_wmic_value(&text).ok_or_else(|| {
                    ProbeError::metric_unavailable("cpu_model", "empty wmic output")
                })
            });
        match wmic {
            Ok(model) => Ok(model),
            Err(err) => {
                debug!(error = %err, "wmic unavailable, trying CIM");
                let text = run_command(
                    "powershell",
                    &["-NoProfile", "-Command", "(Get-CimInstance Win32_Processor).Name"],
                    &[],
                )?;
                text.lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| ProbeError::metric_unavailable("cpu_model", "empty CIM output"))
            }
        }
    }

    fn machine_arch(&self) -> Result<String, ProbeError> {
        windows_arch(
            std::env::var("PROCESSOR_ARCHITEW6432").ok(),
            std::env::var("PROCESSOR_ARCHITECTURE").ok(),
        )
        .ok_or_else(|| ProbeError::metric_unavailable("cpu_word_size", "PROCESSOR_ARCHITECTURE not set"))
    }

    fn distribution_name(&self) -> Result<Option<String>, ProbeError> {
        Ok(None)
    }

    fn buffer_cache(&self) -> Result<BufferCache, ProbeError> {
        Err(ProbeError::metric_unavailable(
            "buffer_cache",
            "no separate buffer/cache counters on this platform",
        ))
    }

    fn partition_usage(&self, partition: &MountedPartition) -> Result<PartitionUsage, ProbeError> {
        if partition.total_bytes == 0 {
            return Err(ProbeError::metric_unavailable(
                "partition",
                format!("{} is not ready", partition.device),
            ));
        }
        let total = partition.total_bytes as f64;
        let free = partition.available_bytes.min(partition.total_bytes) as f64;
        let used_percent = round_to((total - free) / total * 100.0, 1);
        Ok(PartitionUsage {
            capacity: format_gib(partition.total_bytes),
            free: format_gib(partition.available_bytes),
            free_percent: round_to(100.0 - used_percent, 1),
            mount_point: None,
        })
    }

    fn service_status(&self, name: &str) -> Result<RawServiceStatus, ProbeError> {
        let text = run_command("sc", &["query", name], &[])?;
        parse_sc_state(&text)
            .map(RawServiceStatus::State)
            .ok_or_else(|| ProbeError::metric_unavailable("service", format!("no STATE for {name}")))
    }
}

/// Runs a command to completion and returns its stdout. Spawn failure and a
/// non-zero exit both count as the tool being unavailable.
pub fn run_command(program: &str, args: &[&str], envs: &[(&str, &str)]) -> Result<String, ProbeError> {
    let display = if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    };
    let output = Command::new(program)
        .args(args)
        .envs(envs.iter().copied())
        .output()
        .map_err(|err| ProbeError::probe_unavailable(&display, err.to_string()))?;
    if !output.status.success() {
        return Err(ProbeError::probe_unavailable(
            &display,
            format!("exited with {}", output.status),
        ));
    }
    Ok(decode_cmd_stdout(&output.stdout))
}

pub fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    // wmic writes UTF-16LE when redirected
    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s.trim_start_matches('\u{feff}').to_string();
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

pub fn parse_lscpu_model(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        if label.trim() != "Model name" {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// First data line of a single-column `wmic ... get <field>` listing.
pub fn parse_wmic_value(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .nth(1)
        .map(str::to_string)
}

/// Native machine architecture. A 32-bit process under WOW64 sees `x86` in
/// `PROCESSOR_ARCHITECTURE`; the real one is in `PROCESSOR_ARCHITEW6432`.
pub fn windows_arch(wow64: Option<String>, native: Option<String>) -> Option<String> {
    [wow64, native]
        .into_iter()
        .flatten()
        .map(|arch| arch.trim().to_string())
        .find(|arch| !arch.is_empty())
}

pub fn parse_meminfo_buffer_cache(text: &str) -> Option<BufferCache> {
    let mut buffers = None;
    let mut cached = None;
    for line in text.lines() {
        if let Some(val) = line.strip_prefix("Buffers:") {
            buffers = parse_kb_value(val);
        } else if let Some(val) = line.strip_prefix("Cached:") {
            cached = parse_kb_value(val);
        }
    }
    Some(BufferCache {
        buffer_bytes: buffers? * 1024,
        cache_bytes: cached? * 1024,
    })
}

fn parse_kb_value(val: &str) -> Option<u64> {
    val.split_whitespace().next()?.parse().ok()
}

/// Reads the last data row of `df -hP` from the right: mount point, use%,
/// avail, used, size. The known `mount_point` is cut off first since it may
/// contain spaces; device names on the left may contain anything.
pub fn parse_df_output(text: &str, mount_point: &str) -> Option<PartitionUsage> {
    let row = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .last()?;
    let (rest, mount) = match row.strip_suffix(mount_point) {
        Some(rest) if !mount_point.is_empty() && rest.ends_with(char::is_whitespace) => {
            (rest, mount_point)
        }
        _ => row.rsplit_once(char::is_whitespace)?,
    };
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    let n = fields.len();
    let use_percent: f64 = fields[n - 1].trim_end_matches('%').parse().ok()?;
    Some(PartitionUsage {
        capacity: fields[n - 4].to_string(),
        free: fields[n - 2].to_string(),
        free_percent: round_to(100.0 - use_percent, 1),
        mount_point: Some(mount.to_string()),
    })
}

/// State word from `sc query`, e.g. `RUNNING` in `STATE : 4  RUNNING`.
pub fn parse_sc_state(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        if label.trim() != "STATE" {
            return None;
        }
        value.split_whitespace().nth(1).map(str::to_string)
    })
}

fn format_gib(bytes: u64) -> String {
    format!("{:.1}G", bytes as f64 / GIB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CpuWordSize;

    #[test]
    fn lscpu_model_name_is_extracted() {
        let text = "Architecture:            x86_64\n\
                    CPU op-mode(s):          32-bit, 64-bit\n\
                    Vendor ID:               GenuineIntel\n\
                    Model name:              Intel(R) Core(TM) i7-8550U CPU @ 1.80GHz\n\
                    BIOS Model name:         Something else\n";
        assert_eq!(
            parse_lscpu_model(text).as_deref(),
            Some("Intel(R) Core(TM) i7-8550U CPU @ 1.80GHz")
        );
        assert_eq!(parse_lscpu_model("Architecture: aarch64\n"), None);
    }

    #[test]
    fn wmic_skips_header_and_blank_lines() {
        let text = "Name                                      \r\r\n\
                    Intel(R) Core(TM) i5-10400 CPU @ 2.90GHz  \r\r\n\r\r\n";
        assert_eq!(
            parse_wmic_value(text).as_deref(),
            Some("Intel(R) Core(TM) i5-10400 CPU @ 2.90GHz")
        );
        assert_eq!(parse_wmic_value("Name\r\n\r\n"), None);
    }

    #[test]
    fn utf16_stdout_is_decoded() {
        let mut bytes = vec![0xff, 0xfe];
        bytes.extend("Name\r\nCPU\r\n".encode_utf16().flat_map(|u| u.to_le_bytes()));
        assert_eq!(parse_wmic_value(&decode_cmd_stdout(&bytes)).as_deref(), Some("CPU"));
    }

    #[test]
    fn distribution_matches_sysinfo_name() {
        let probe = PosixProbe { os: "linux" };
        match System::new().name() {
            Some(name) => assert_eq!(probe.distribution_name(), Ok(Some(name))),
            None => assert!(matches!(
                probe.distribution_name(),
                Err(ProbeError::MetricUnavailable { .. })
            )),
        }
    }

    #[test]
    fn distribution_absent_off_linux() {
        let probe = PosixProbe { os: "macos" };
        assert_eq!(probe.distribution_name(), Ok(None));
    }

    #[test]
    fn wow64_architecture_wins_over_process_architecture() {
        assert_eq!(
            windows_arch(Some("AMD64".to_string()), Some("x86".to_string())).as_deref(),
            Some("AMD64")
        );
        assert_eq!(windows_arch(None, Some("ARM64".to_string())).as_deref(), Some("ARM64"));
        assert_eq!(windows_arch(Some(" ".to_string()), Some("x86".to_string())).as_deref(), Some("x86"));
        assert_eq!(windows_arch(None, None), None);

        let arch = windows_arch(Some("AMD64".to_string()), Some("x86".to_string())).unwrap();
        assert_eq!(CpuWordSize::from_arch(&arch), CpuWordSize::Bits64);
    }

    #[test]
    fn meminfo_buffers_and_cached_are_read() {
        let text = "MemTotal:       16303428 kB\n\
                    MemFree:         1203456 kB\n\
                    Buffers:          524288 kB\n\
                    Cached:          4194304 kB\n\
                    SwapCached:            0 kB\n";
        let bc = parse_meminfo_buffer_cache(text).expect("counters present");
        assert_eq!(bc.buffer_bytes, 524_288 * 1024);
        assert_eq!(bc.cache_bytes, 4_194_304 * 1024);
        assert_eq!(parse_meminfo_buffer_cache("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn df_output_parsed_from_the_right() {
        let text = "Filesystem      Size  Used Avail Use% Mounted on\n\
                    /dev/nvme0n1p2  468G  201G  244G  46% /\n";
        let usage = parse_df_output(text, "/").expect("valid df output");
        assert_eq!(usage.capacity, "468G");
        assert_eq!(usage.free, "244G");
        assert_eq!(usage.free_percent, 54.0);
        assert_eq!(usage.mount_point.as_deref(), Some("/"));
    }

    #[test]
    fn df_output_tolerates_spaces_in_device_column() {
        let text = "Filesystem     Size   Used  Avail Capacity  Mounted on\n\
                    map auto_home    0Bi    0Bi    0Bi   100%    /System/Volumes/Data/home\n";
        let usage = parse_df_output(text, "/System/Volumes/Data/home").expect("valid df output");
        assert_eq!(usage.capacity, "0Bi");
        assert_eq!(usage.free_percent, 0.0);
        assert_eq!(usage.mount_point.as_deref(), Some("/System/Volumes/Data/home"));
    }

    #[test]
    fn df_output_keeps_spaces_in_mount_point() {
        let text = "Filesystem      Size  Used Avail Use% Mounted on\n\
                    /dev/sdb1       916G  100G  770G  12% /media/u/My Disk\n";
        let usage = parse_df_output(text, "/media/u/My Disk").expect("valid df output");
        assert_eq!(usage.capacity, "916G");
        assert_eq!(usage.free, "770G");
        assert_eq!(usage.free_percent, 88.0);
        assert_eq!(usage.mount_point.as_deref(), Some("/media/u/My Disk"));
    }

    #[test]
    fn df_output_falls_back_when_mount_point_differs() {
        let text = "Filesystem      Size  Used Avail Use% Mounted on\n\
                    /dev/sda1        50G   20G   30G  40% /boot\n";
        let usage = parse_df_output(text, "/mnt/elsewhere").expect("valid df output");
        assert_eq!(usage.free, "30G");
        assert_eq!(usage.mount_point.as_deref(), Some("/boot"));
    }

    #[test]
    fn df_output_rejects_garbage() {
        assert!(parse_df_output("df: /dev/sdz: No such file", "/").is_none());
        assert!(parse_df_output("a b c d e", "e").is_none());
    }

    #[test]
    fn sc_query_state_word() {
        let text = "SERVICE_NAME: Spooler\r\n        TYPE               : 110  WIN32_OWN_PROCESS\r\n        STATE              : 4  RUNNING\r\n                                (STOPPABLE, NOT_PAUSABLE)\r\n";
        assert_eq!(parse_sc_state(text).as_deref(), Some("RUNNING"));
        assert_eq!(parse_sc_state("[SC] EnumQueryServicesStatus:OpenService FAILED 1060"), None);
    }

    #[test]
    fn windows_partition_usage_from_native_counters() {
        let partition = MountedPartition {
            device: "C:\\".to_string(),
            filesystem: "NTFS".to_string(),
            mount_point: "C:\\".to_string(),
            total_bytes: 100 * 1024 * 1024 * 1024,
            available_bytes: 25 * 1024 * 1024 * 1024,
        };
        let usage = WindowsProbe.partition_usage(&partition).expect("ready drive");
        assert_eq!(usage.capacity, "100.0G");
        assert_eq!(usage.free, "25.0G");
        assert_eq!(usage.free_percent, 25.0);
        assert_eq!(usage.mount_point, None);

        let empty = MountedPartition {
            total_bytes: 0,
            available_bytes: 0,
            ..partition
        };
        assert!(WindowsProbe.partition_usage(&empty).is_err());
    }

    #[test]
    fn windows_has_no_buffer_cache_or_distribution() {
        assert!(matches!(
            WindowsProbe.buffer_cache(),
            Err(ProbeError::MetricUnavailable { .. })
        ));
        assert_eq!(WindowsProbe.distribution_name(), Ok(None));
    }

    #[test]
    fn family_maps_to_services_section() {
        assert_eq!(PlatformFamily::Posix.services_section(), "Linux");
        assert_eq!(PlatformFamily::Windows.services_section(), "Windows");
        let family = PlatformFamily::detect();
        assert_eq!(probe_for(family).family(), family);
        assert_eq!(family == PlatformFamily::Windows, cfg!(windows));
    }

    #[test]
    fn missing_tool_is_probe_unavailable() {
        let err = run_command("hostpulse-no-such-tool", &["--version"], &[]).unwrap_err();
        assert!(matches!(err, ProbeError::ProbeUnavailable { .. }));
    }
}
