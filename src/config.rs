use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Highest archive index before the rotation wraps back to 1.
pub const MAX_ARCHIVE_INDEX: u32 = 65_534;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_http_enabled")]
    pub http_enabled: bool,
    #[serde(default = "default_live_interval_secs")]
    pub live_interval_secs: u64,
    #[serde(default = "default_archive_interval_secs")]
    pub archive_interval_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_archive_max_files")]
    pub archive_max_files: u32,
    #[serde(default = "default_services_file")]
    pub services_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            http_enabled: default_http_enabled(),
            live_interval_secs: default_live_interval_secs(),
            archive_interval_secs: default_archive_interval_secs(),
            output_dir: default_output_dir(),
            archive_dir: default_archive_dir(),
            archive_max_files: default_archive_max_files(),
            services_file: default_services_file(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Like `load_from_file`, but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load_from_file(path.as_ref()) {
            Err(ConfigError::Read { source, path }) if source.kind() == ErrorKind::NotFound => {
                warn!(path = %path, "config file not found, using defaults");
                let cfg = Self::default();
                cfg.validate()?;
                Ok(cfg)
            }
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a host:port socket address".to_string(),
            ));
        }
        if self.live_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "live_interval_secs must be >= 1".to_string(),
            ));
        }
        if self.archive_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "archive_interval_secs must be >= 1".to_string(),
            ));
        }
        if !(1..=MAX_ARCHIVE_INDEX).contains(&self.archive_max_files) {
            return Err(ConfigError::Validation(format!(
                "archive_max_files must be in 1..={MAX_ARCHIVE_INDEX}"
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "output_dir must not be empty".to_string(),
            ));
        }
        if self.archive_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "archive_dir must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../hostpulse.yaml.example")
    }
}

/// Service declarations, one section per platform family. Each section maps
/// arbitrary keys to service identifiers.
pub struct ServicesConfig;

impl ServicesConfig {
    /// Service identifiers of `section`, in file order. Any reason for having
    /// nothing to check comes back as `ConfigurationAbsent`.
    pub fn load_section(path: &Path, section: &str) -> Result<Vec<String>, ProbeError> {
        let text = fs::read_to_string(path).map_err(|err| {
            ProbeError::configuration_absent(format!("{}: {err}", path.display()))
        })?;
        let doc = parse_document(&text).map_err(|err| {
            warn!(file = %path.display(), error = %err, "ignoring malformed services file");
            err
        })?;
        section_entries(&doc, section)
    }

    pub fn parse_section(text: &str, section: &str) -> Result<Vec<String>, ProbeError> {
        section_entries(&parse_document(text)?, section)
    }
}

fn parse_document(text: &str) -> Result<serde_yaml::Value, ProbeError> {
    serde_yaml::from_str(text)
        .map_err(|err| ProbeError::configuration_absent(format!("invalid YAML: {err}")))
}

fn section_entries(doc: &serde_yaml::Value, section: &str) -> Result<Vec<String>, ProbeError> {
    let entries = doc
        .get(section)
        .and_then(serde_yaml::Value::as_mapping)
        .ok_or_else(|| ProbeError::configuration_absent(format!("no `{section}` section")))?;

    Ok(entries.values().filter_map(scalar_to_string).collect())
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

const fn default_http_enabled() -> bool {
    true
}

const fn default_live_interval_secs() -> u64 {
    1
}

const fn default_archive_interval_secs() -> u64 {
    60
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./static")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./static/archive")
}

const fn default_archive_max_files() -> u32 {
    MAX_ARCHIVE_INDEX
}

fn default_services_file() -> PathBuf {
    PathBuf::from("./services.yaml")
}
