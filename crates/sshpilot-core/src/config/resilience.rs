//! Manager-wide resilience configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use super::circuit::{CircuitConfig, ServiceOverrides};
use super::defaults;
use crate::error::{ResilienceError, ResilienceResult};

/// A declared dependency of one service on another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Name of the service depended upon
    pub service: String,
    /// Whether the dependent cannot work without it
    #[serde(default)]
    pub required: bool,
    /// Service to use instead while the dependency is unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl DependencySpec {
    pub fn required(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            required: true,
            fallback: None,
        }
    }

    pub fn optional(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            required: false,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }
}

/// Full configuration for a [`ResilienceManager`](crate::resilience::ResilienceManager)
///
/// ```toml
/// enable_cascading_failure = true
///
/// [defaults]
/// failure_threshold = 5
/// timeout = "60s"
///
/// [services.authentication]
/// failure_threshold = 2
/// error_threshold_percentage = 0.1
///
/// [services.credential-store]
///
/// [[dependencies.authentication]]
/// service = "credential-store"
/// required = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Manager-wide defaults applied to every circuit
    pub defaults: CircuitConfig,
    /// Declared services and their overrides; one circuit per entry
    pub services: BTreeMap<String, ServiceOverrides>,
    /// Service -> ordered list of dependencies
    pub dependencies: BTreeMap<String, Vec<DependencySpec>>,
    /// Force dependents open when a required dependency is unhealthy
    pub enable_cascading_failure: bool,
    /// Start the stuck half-open sweep at construction
    pub enable_auto_recovery: bool,
    #[serde(with = "humantime_serde")]
    pub auto_recovery_interval: Duration,
    /// Half-open duration after which the sweep resets a circuit
    #[serde(with = "humantime_serde")]
    pub stuck_half_open_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            defaults: CircuitConfig::default(),
            services: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            enable_cascading_failure: true,
            enable_auto_recovery: false,
            auto_recovery_interval: defaults::auto_recovery_interval(),
            stuck_half_open_timeout: defaults::stuck_half_open_timeout(),
        }
    }
}

impl ResilienceConfig {
    /// The built-in catalog of SSH automation services
    pub fn ssh_defaults() -> Self {
        defaults::ssh_catalog()
    }

    /// Declare a service with the given overrides
    pub fn with_service(mut self, name: impl Into<String>, overrides: ServiceOverrides) -> Self {
        self.services.insert(name.into(), overrides);
        self
    }

    /// Declare a dependency of `service`
    pub fn with_dependency(mut self, service: impl Into<String>, dependency: DependencySpec) -> Self {
        self.dependencies
            .entry(service.into())
            .or_default()
            .push(dependency);
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> ResilienceResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ResilienceError::invalid_config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> ResilienceResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResilienceError::invalid_config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Effective config of a declared service
    pub fn circuit_config(&self, service: &str) -> Option<CircuitConfig> {
        self.services
            .get(service)
            .map(|overrides| self.defaults.merged(overrides))
    }

    /// Validate every merged service config and the dependency declarations
    pub fn validate(&self) -> ResilienceResult<()> {
        self.defaults.validate()?;

        for (name, overrides) in &self.services {
            if name.trim().is_empty() {
                return Err(ResilienceError::invalid_config("service name must not be empty"));
            }
            self.defaults
                .merged(overrides)
                .validate()
                .map_err(|e| match e {
                    ResilienceError::InvalidConfig(msg) => {
                        ResilienceError::invalid_config(format!("service '{}': {}", name, msg))
                    }
                    other => other,
                })?;
        }

        for (service, deps) in &self.dependencies {
            if !self.services.contains_key(service) {
                return Err(ResilienceError::invalid_config(format!(
                    "dependencies declared for undeclared service '{}'",
                    service
                )));
            }
            for dep in deps {
                if dep.service == *service {
                    return Err(ResilienceError::invalid_config(format!(
                        "service '{}' cannot depend on itself",
                        service
                    )));
                }
                if !self.services.contains_key(&dep.service) {
                    return Err(ResilienceError::invalid_config(format!(
                        "service '{}' depends on undeclared service '{}'",
                        service, dep.service
                    )));
                }
                if let Some(fallback) = &dep.fallback {
                    if !self.services.contains_key(fallback) {
                        return Err(ResilienceError::invalid_config(format!(
                            "service '{}' names undeclared fallback '{}'",
                            service, fallback
                        )));
                    }
                }
            }
        }

        if self.auto_recovery_interval.is_zero() {
            return Err(ResilienceError::invalid_config(
                "auto_recovery_interval must be non-zero",
            ));
        }
        if self.stuck_half_open_timeout.is_zero() {
            return Err(ResilienceError::invalid_config(
                "stuck_half_open_timeout must be non-zero",
            ));
        }
        Ok(())
    }
}
