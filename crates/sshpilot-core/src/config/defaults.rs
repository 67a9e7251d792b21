//! Default values and the built-in SSH service catalog

use std::collections::BTreeMap;
use std::time::Duration;

use super::circuit::{CircuitConfig, ServiceOverrides};
use super::resilience::{DependencySpec, ResilienceConfig};

/// Hard ceiling for the backoff multiplier
pub const MAX_BACKOFF_MULTIPLIER: u32 = 16;

/// Number of latency samples kept for the rolling average
pub const LATENCY_SAMPLE_CAPACITY: usize = 100;

/// Interval of the auto-recovery sweep (30 seconds)
pub const AUTO_RECOVERY_INTERVAL_SECS: u64 = 30;

/// How long a circuit may stay half-open before the sweep resets it (5 minutes)
pub const STUCK_HALF_OPEN_SECS: u64 = 300;

pub fn auto_recovery_interval() -> Duration {
    Duration::from_secs(AUTO_RECOVERY_INTERVAL_SECS)
}

pub fn stuck_half_open_timeout() -> Duration {
    Duration::from_secs(STUCK_HALF_OPEN_SECS)
}

/// Service names used by the SSH automation server
pub mod services {
    pub const SSH_CONNECTION: &str = "ssh-connection";
    pub const SSH_COMMAND: &str = "ssh-command";
    pub const FILE_TRANSFER: &str = "file-transfer";
    pub const CREDENTIAL_STORE: &str = "credential-store";
    pub const AUTHENTICATION: &str = "authentication";
    pub const MEMORY_STORE: &str = "memory-store";
    pub const LOGGING: &str = "logging";
}

/// Build the catalog of services the SSH automation server protects
pub(super) fn ssh_catalog() -> ResilienceConfig {
    use services::*;

    let mut overrides = BTreeMap::new();
    overrides.insert(
        SSH_CONNECTION.to_string(),
        ServiceOverrides::default()
            .failure_threshold(3)
            .success_threshold(2)
            .timeout(Duration::from_secs(30)),
    );
    overrides.insert(
        SSH_COMMAND.to_string(),
        ServiceOverrides::default()
            .failure_threshold(5)
            .call_timeout(Duration::from_secs(120)),
    );
    overrides.insert(
        FILE_TRANSFER.to_string(),
        ServiceOverrides::default()
            .failure_threshold(3)
            .call_timeout(Duration::from_secs(300)),
    );
    overrides.insert(
        CREDENTIAL_STORE.to_string(),
        ServiceOverrides::default()
            .failure_threshold(3)
            .timeout(Duration::from_secs(30)),
    );
    overrides.insert(AUTHENTICATION.to_string(), strict_overrides());
    overrides.insert(
        MEMORY_STORE.to_string(),
        ServiceOverrides::default()
            .failure_threshold(10)
            .error_threshold_percentage(0.6),
    );
    overrides.insert(LOGGING.to_string(), tolerant_overrides());

    let mut dependencies = BTreeMap::new();
    dependencies.insert(
        SSH_COMMAND.to_string(),
        vec![DependencySpec::required(SSH_CONNECTION)],
    );
    dependencies.insert(
        FILE_TRANSFER.to_string(),
        vec![DependencySpec::required(SSH_CONNECTION)],
    );
    dependencies.insert(
        AUTHENTICATION.to_string(),
        vec![DependencySpec::required(CREDENTIAL_STORE)],
    );
    dependencies.insert(
        MEMORY_STORE.to_string(),
        vec![DependencySpec::optional(LOGGING)],
    );

    ResilienceConfig {
        defaults: CircuitConfig::default(),
        services: overrides,
        dependencies,
        ..Default::default()
    }
}

fn strict_overrides() -> ServiceOverrides {
    let strict = CircuitConfig::strict();
    ServiceOverrides::default()
        .failure_threshold(strict.failure_threshold)
        .error_threshold_percentage(strict.error_threshold_percentage)
}

fn tolerant_overrides() -> ServiceOverrides {
    let tolerant = CircuitConfig::tolerant();
    ServiceOverrides::default()
        .failure_threshold(tolerant.failure_threshold)
        .success_threshold(tolerant.success_threshold)
        .error_threshold_percentage(tolerant.error_threshold_percentage)
        .enable_health_checks(tolerant.enable_health_checks)
}
