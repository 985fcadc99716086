use crate::collectors::platform::PlatformProbe;
use crate::config::ServicesConfig;
use crate::error::{ProbeError, ProbeFailure};
use crate::snapshot::ServiceStatus;
use std::path::Path;
use tracing::{debug, warn};

/// Reports the status of every service declared for the probe's platform
/// family. The services file is read on every call.
pub fn check_services(
    probe: &dyn PlatformProbe,
    services_file: &Path,
) -> (Vec<ServiceStatus>, Vec<ProbeFailure>) {
    let section = probe.family().services_section();
    let declared = match ServicesConfig::load_section(services_file, section) {
        Ok(declared) => declared,
        Err(err) => {
            debug!(file = %services_file.display(), section, error = %err, "no services configured");
            return (Vec::new(), Vec::new());
        }
    };
    check_declared(probe, &declared)
}

/// One status per declared service, in declaration order. A failed lookup
/// leaves a nulled entry at its position.
pub fn check_declared(
    probe: &dyn PlatformProbe,
    declared: &[String],
) -> (Vec<ServiceStatus>, Vec<ProbeFailure>) {
    let mut out = Vec::with_capacity(declared.len());
    let mut failures = Vec::new();

    for (index, name) in declared.iter().enumerate() {
        match probe.service_status(name) {
            Ok(raw) => out.push(ServiceStatus {
                name: Some(name.clone()),
                is_active: raw.activity(),
                raw_status: Some(raw),
            }),
            Err(err) => {
                warn!(service = %name, index, error = %err, "service lookup failed");
                let err = ProbeError::partial("service", index, &err);
                failures.push(ProbeFailure::new(format!("services[{index}]"), &err));
                out.push(ServiceStatus::failed());
            }
        }
    }

    (out, failures)
}
