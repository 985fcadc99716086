use crate::error::ProbeFailure;
use serde::{Deserialize, Serialize};

/// Display format of `HostSnapshot::timestamp`, local time.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// One fully assembled, point-in-time record of the host. Built fresh on
/// every tick and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub timestamp: String,
    pub platform_name: String,
    pub platform_version: Option<String>,
    pub kernel_description: Option<String>,
    pub host_name: String,
    /// `None` off Linux: not applicable rather than unknown.
    pub distribution_name: Option<String>,
    pub uptime_seconds: u64,
    pub uptime_formatted: String,
    pub cpu_model: Option<String>,
    pub cpu_word_size: CpuWordSize,
    pub cpu_frequency_ghz: Option<f64>,
    pub cpu_core_count: usize,
    pub cpu_usage_percent: f64,
    pub memory_total_gb: f64,
    pub memory_free_gb: f64,
    pub memory_used_gb: f64,
    pub memory_used_percent: f64,
    pub buffer_mb: Option<f64>,
    pub cache_mb: Option<f64>,
    pub partitions: Vec<PartitionInfo>,
    pub services: Vec<ServiceStatus>,
    #[serde(default)]
    pub errors: Vec<ProbeFailure>,
}

/// Usage of one mounted partition. Every field but `device` is `None` when
/// the usage query for that partition failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub device: String,
    pub capacity: Option<String>,
    pub free: Option<String>,
    /// 100 minus the reported use percentage.
    pub free_percent: Option<f64>,
    pub filesystem: Option<String>,
    pub mount_point: Option<String>,
}

impl PartitionInfo {
    pub fn failed(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            capacity: None,
            free: None,
            free_percent: None,
            filesystem: None,
            mount_point: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: Option<String>,
    pub is_active: ServiceActivity,
    pub raw_status: Option<RawServiceStatus>,
}

impl ServiceStatus {
    /// Placeholder kept at the position of a service whose lookup failed.
    pub fn failed() -> Self {
        Self {
            name: None,
            is_active: ServiceActivity::Unknown,
            raw_status: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceActivity {
    Running,
    Stopped,
    Unknown,
}

/// Status exactly as the service manager reported it: a `systemctl` exit
/// code on POSIX hosts, the service-control state word on Windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawServiceStatus {
    ExitCode(i32),
    State(String),
}

impl RawServiceStatus {
    pub fn activity(&self) -> ServiceActivity {
        match self {
            Self::ExitCode(0) => ServiceActivity::Running,
            // systemctl: 4 = no such unit
            Self::ExitCode(4) => ServiceActivity::Unknown,
            Self::ExitCode(_) => ServiceActivity::Stopped,
            Self::State(state) => match state.to_ascii_uppercase().as_str() {
                "RUNNING" => ServiceActivity::Running,
                "STOPPED" => ServiceActivity::Stopped,
                _ => ServiceActivity::Unknown,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CpuWordSize {
    Bits32,
    Bits64,
}

impl CpuWordSize {
    /// `x86_64`, `AMD64` and `aarch64` are 64-bit; anything else is 32-bit.
    pub fn from_arch(arch: &str) -> Self {
        if arch.trim().ends_with("64") {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }
}

impl From<CpuWordSize> for u8 {
    fn from(value: CpuWordSize) -> Self {
        match value {
            CpuWordSize::Bits32 => 32,
            CpuWordSize::Bits64 => 64,
        }
    }
}

impl TryFrom<u8> for CpuWordSize {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            32 => Ok(Self::Bits32),
            64 => Ok(Self::Bits64),
            other => Err(format!("cpu word size must be 32 or 64, got {other}")),
        }
    }
}

/// `days:HH:MM:SS`, days unpadded.
pub fn format_uptime(uptime_seconds: u64) -> String {
    let days = uptime_seconds / 86_400;
    let rest = uptime_seconds % 86_400;
    format!(
        "{}:{:02}:{:02}:{:02}",
        days,
        rest / 3600,
        (rest % 3600) / 60,
        rest % 60
    )
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}
