use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single probe. None of these abort snapshot assembly: the
/// affected field is nulled and the failure is recorded alongside it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("metric {metric} unavailable: {reason}")]
    MetricUnavailable { metric: String, reason: String },

    #[error("command `{command}` failed: {reason}")]
    ProbeUnavailable { command: String, reason: String },

    #[error("no service declarations: {reason}")]
    ConfigurationAbsent { reason: String },

    #[error("{element} #{index} failed: {reason}")]
    PartialEnumerationFailure {
        element: String,
        index: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    MetricUnavailable,
    ProbeUnavailable,
    ConfigurationAbsent,
    PartialEnumerationFailure,
}

impl ProbeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MetricUnavailable => "metric_unavailable",
            Self::ProbeUnavailable => "probe_unavailable",
            Self::ConfigurationAbsent => "configuration_absent",
            Self::PartialEnumerationFailure => "partial_enumeration_failure",
        }
    }
}

impl ProbeError {
    pub fn metric_unavailable(metric: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetricUnavailable {
            metric: metric.into(),
            reason: reason.into(),
        }
    }

    pub fn probe_unavailable(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProbeUnavailable {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration_absent(reason: impl Into<String>) -> Self {
        Self::ConfigurationAbsent {
            reason: reason.into(),
        }
    }

    /// Wraps a lower-level failure as the failure of one element of an enumeration.
    pub fn partial(element: impl Into<String>, index: usize, cause: &ProbeError) -> Self {
        Self::PartialEnumerationFailure {
            element: element.into(),
            index,
            reason: cause.to_string(),
        }
    }

    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            Self::MetricUnavailable { .. } => ProbeErrorKind::MetricUnavailable,
            Self::ProbeUnavailable { .. } => ProbeErrorKind::ProbeUnavailable,
            Self::ConfigurationAbsent { .. } => ProbeErrorKind::ConfigurationAbsent,
            Self::PartialEnumerationFailure { .. } => ProbeErrorKind::PartialEnumerationFailure,
        }
    }
}

/// A probe failure as carried inside a snapshot, next to the field it nulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub metric: String,
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(metric: impl Into<String>, err: &ProbeError) -> Self {
        Self {
            metric: metric.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_keeps_cause_message() {
        let cause = ProbeError::probe_unavailable("df -hP /dev/sdb1", "exit status 1");
        let err = ProbeError::partial("partition", 1, &cause);
        assert_eq!(err.kind(), ProbeErrorKind::PartialEnumerationFailure);
        assert_eq!(
            err.to_string(),
            "partition #1 failed: command `df -hP /dev/sdb1` failed: exit status 1"
        );
    }

    #[test]
    fn failure_record_serializes_kind_in_snake_case() {
        let err = ProbeError::metric_unavailable("buffer_mb", "no Buffers line");
        let failure = ProbeFailure::new("buffer_mb", &err);
        let json = serde_json::to_string(&failure).expect("serialize");
        assert!(json.contains("\"kind\":\"metric_unavailable\""));
    }
}
