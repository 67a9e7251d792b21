//! Tests for resilience configuration

use std::io::Write;
use std::time::Duration;

use super::defaults::services;
use super::*;

#[test]
fn test_overrides_merge_over_defaults() {
    let defaults = CircuitConfig::default();
    let overrides = ServiceOverrides::default()
        .failure_threshold(2)
        .call_timeout(Duration::from_secs(5));

    let merged = defaults.merged(&overrides);
    assert_eq!(merged.failure_threshold, 2);
    assert_eq!(merged.call_timeout, Some(Duration::from_secs(5)));
    assert_eq!(merged.success_threshold, defaults.success_threshold);
    assert_eq!(merged.timeout, defaults.timeout);
}

#[test]
fn test_effective_call_timeout_falls_back_to_timeout() {
    let config = CircuitConfig {
        timeout: Duration::from_millis(750),
        ..Default::default()
    };
    assert_eq!(config.effective_call_timeout(), Duration::from_millis(750));

    let config = CircuitConfig {
        call_timeout: Some(Duration::from_millis(100)),
        ..config
    };
    assert_eq!(config.effective_call_timeout(), Duration::from_millis(100));
}

#[test]
fn test_max_backoff_multiplier_respects_both_caps() {
    let config = CircuitConfig {
        timeout: Duration::from_secs(1),
        max_backoff_time: Duration::from_secs(300),
        ..Default::default()
    };
    assert_eq!(config.max_backoff_multiplier(), 16);

    let config = CircuitConfig {
        timeout: Duration::from_secs(10),
        max_backoff_time: Duration::from_secs(45),
        ..Default::default()
    };
    assert_eq!(config.max_backoff_multiplier(), 4);

    let config = CircuitConfig {
        timeout: Duration::from_secs(10),
        max_backoff_time: Duration::from_secs(10),
        ..Default::default()
    };
    assert_eq!(config.max_backoff_multiplier(), 1);
}

#[test]
fn test_validation_rejects_bad_values() {
    let zero_failures = CircuitConfig {
        failure_threshold: 0,
        ..Default::default()
    };
    assert!(zero_failures.validate().is_err());

    let bad_rate = CircuitConfig {
        error_threshold_percentage: 1.5,
        ..Default::default()
    };
    assert!(bad_rate.validate().is_err());

    let short_backoff = CircuitConfig {
        timeout: Duration::from_secs(10),
        max_backoff_time: Duration::from_secs(5),
        ..Default::default()
    };
    assert!(short_backoff.validate().is_err());

    assert!(CircuitConfig::default().validate().is_ok());
}

#[test]
fn test_ssh_defaults_catalog() {
    let config = ResilienceConfig::ssh_defaults();
    config.validate().unwrap();

    let auth = config.circuit_config(services::AUTHENTICATION).unwrap();
    assert_eq!(auth.failure_threshold, 2);
    assert!((auth.error_threshold_percentage - 0.1).abs() < f64::EPSILON);

    let logging = config.circuit_config(services::LOGGING).unwrap();
    assert_eq!(logging.failure_threshold, 20);
    assert!(!logging.enable_health_checks);

    let command_deps = &config.dependencies[services::SSH_COMMAND];
    assert_eq!(command_deps.len(), 1);
    assert_eq!(command_deps[0].service, services::SSH_CONNECTION);
    assert!(command_deps[0].required);
}

#[test]
fn test_dependency_on_undeclared_service_is_rejected() {
    let config = ResilienceConfig::default()
        .with_service("ssh-command", ServiceOverrides::default())
        .with_dependency("ssh-command", DependencySpec::required("ssh-connection"));

    let err = config.validate().unwrap_err();
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("ssh-connection"));
}

#[test]
fn test_self_dependency_is_rejected() {
    let config = ResilienceConfig::default()
        .with_service("loop", ServiceOverrides::default())
        .with_dependency("loop", DependencySpec::required("loop"));

    assert!(config.validate().is_err());
}

#[test]
fn test_parse_toml() {
    let content = r#"
enable_cascading_failure = true
enable_auto_recovery = true
auto_recovery_interval = "10s"

[defaults]
failure_threshold = 4
timeout = "2s"
max_backoff_time = "1m"

[services.credential-store]

[services.authentication]
failure_threshold = 2
error_threshold_percentage = 0.1
call_timeout = "500ms"

[[dependencies.authentication]]
service = "credential-store"
required = true
"#;

    let config = ResilienceConfig::from_toml_str(content).unwrap();
    assert!(config.enable_auto_recovery);
    assert_eq!(config.auto_recovery_interval, Duration::from_secs(10));
    assert_eq!(config.defaults.failure_threshold, 4);
    assert_eq!(config.defaults.success_threshold, 3);

    let auth = config.circuit_config("authentication").unwrap();
    assert_eq!(auth.failure_threshold, 2);
    assert_eq!(auth.timeout, Duration::from_secs(2));
    assert_eq!(auth.call_timeout, Some(Duration::from_millis(500)));

    let store = config.circuit_config("credential-store").unwrap();
    assert_eq!(store.failure_threshold, 4);
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[services.ssh-connection]\nfailure_threshold = 3\n\n[services.logging]\nenable_health_checks = false"
    )
    .unwrap();

    let config = ResilienceConfig::load(file.path()).unwrap();
    assert_eq!(config.services.len(), 2);
    assert!(!config.circuit_config("logging").unwrap().enable_health_checks);
}

#[test]
fn test_load_missing_file_is_config_error() {
    let err = ResilienceConfig::load("/nonexistent/sshpilot/resilience.toml").unwrap_err();
    assert!(err.is_configuration_error());
}
