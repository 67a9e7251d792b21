//! Per-circuit configuration and per-service overrides

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults;
use crate::error::{ResilienceError, ResilienceResult};

/// Configuration for a single circuit breaker
///
/// Immutable once the circuit has been constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures (since the last success) that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,
    /// Base recovery delay before an open circuit admits a probe
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Minimum recorded requests before the error-rate rule applies
    pub volume_threshold: u64,
    /// Error rate (0.0 - 1.0) at or above which the circuit opens
    pub error_threshold_percentage: f64,
    /// Window after which a stale failure count is forgotten
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Double the recovery delay on every re-open
    pub exponential_backoff: bool,
    /// Upper bound for the recovery delay
    #[serde(with = "humantime_serde")]
    pub max_backoff_time: Duration,
    /// Run the periodic open -> half-open health check
    pub enable_health_checks: bool,
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    /// Time limit for a single call; `timeout` is used when unset
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(60),
            volume_threshold: 10,
            error_threshold_percentage: 0.5,
            reset_timeout: Duration::from_secs(60),
            exponential_backoff: true,
            max_backoff_time: Duration::from_secs(300),
            enable_health_checks: true,
            health_check_interval: Duration::from_secs(30),
            call_timeout: None,
        }
    }
}

impl CircuitConfig {
    /// Config for critical services that should fail fast
    pub fn strict() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 3,
            error_threshold_percentage: 0.1,
            ..Default::default()
        }
    }

    /// Config for best-effort services that tolerate many failures
    pub fn tolerant() -> Self {
        Self {
            failure_threshold: 20,
            success_threshold: 2,
            error_threshold_percentage: 0.8,
            enable_health_checks: false,
            ..Default::default()
        }
    }

    /// Time limit applied to a call without a per-call override
    pub fn effective_call_timeout(&self) -> Duration {
        self.call_timeout.unwrap_or(self.timeout)
    }

    /// Largest backoff multiplier allowed by `max_backoff_time`
    pub fn max_backoff_multiplier(&self) -> u32 {
        let by_time = if self.timeout.is_zero() {
            defaults::MAX_BACKOFF_MULTIPLIER
        } else {
            let ratio = self.max_backoff_time.as_nanos() / self.timeout.as_nanos();
            ratio.min(u128::from(defaults::MAX_BACKOFF_MULTIPLIER)) as u32
        };
        by_time.clamp(1, defaults::MAX_BACKOFF_MULTIPLIER)
    }

    /// Apply overrides on top of this config
    pub fn merged(&self, overrides: &ServiceOverrides) -> Self {
        Self {
            failure_threshold: overrides
                .failure_threshold
                .unwrap_or(self.failure_threshold),
            success_threshold: overrides
                .success_threshold
                .unwrap_or(self.success_threshold),
            timeout: overrides.timeout.unwrap_or(self.timeout),
            volume_threshold: overrides.volume_threshold.unwrap_or(self.volume_threshold),
            error_threshold_percentage: overrides
                .error_threshold_percentage
                .unwrap_or(self.error_threshold_percentage),
            reset_timeout: overrides.reset_timeout.unwrap_or(self.reset_timeout),
            exponential_backoff: overrides
                .exponential_backoff
                .unwrap_or(self.exponential_backoff),
            max_backoff_time: overrides.max_backoff_time.unwrap_or(self.max_backoff_time),
            enable_health_checks: overrides
                .enable_health_checks
                .unwrap_or(self.enable_health_checks),
            health_check_interval: overrides
                .health_check_interval
                .unwrap_or(self.health_check_interval),
            call_timeout: overrides.call_timeout.or(self.call_timeout),
        }
    }

    /// Check the invariants the state machine relies on
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::invalid_config(
                "failure_threshold must be at least 1",
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::invalid_config(
                "success_threshold must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.error_threshold_percentage) {
            return Err(ResilienceError::invalid_config(format!(
                "error_threshold_percentage must be within 0.0..=1.0, got {}",
                self.error_threshold_percentage
            )));
        }
        if self.timeout.is_zero() {
            return Err(ResilienceError::invalid_config("timeout must be non-zero"));
        }
        if self.max_backoff_time < self.timeout {
            return Err(ResilienceError::invalid_config(format!(
                "max_backoff_time ({:?}) must not be shorter than timeout ({:?})",
                self.max_backoff_time, self.timeout
            )));
        }
        if self.reset_timeout.is_zero() {
            return Err(ResilienceError::invalid_config(
                "reset_timeout must be non-zero",
            ));
        }
        if self.enable_health_checks && self.health_check_interval.is_zero() {
            return Err(ResilienceError::invalid_config(
                "health_check_interval must be non-zero when health checks are enabled",
            ));
        }
        if matches!(self.call_timeout, Some(t) if t.is_zero()) {
            return Err(ResilienceError::invalid_config(
                "call_timeout must be non-zero when set",
            ));
        }
        Ok(())
    }
}

/// Service-specific overrides merged over the manager-wide defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_threshold: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_threshold_percentage: Option<f64>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub reset_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exponential_backoff: Option<bool>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_backoff_time: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_health_checks: Option<bool>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<Duration>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub call_timeout: Option<Duration>,
}

impl ServiceOverrides {
    pub fn failure_threshold(mut self, value: u32) -> Self {
        self.failure_threshold = Some(value);
        self
    }

    pub fn success_threshold(mut self, value: u32) -> Self {
        self.success_threshold = Some(value);
        self
    }

    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }

    pub fn volume_threshold(mut self, value: u64) -> Self {
        self.volume_threshold = Some(value);
        self
    }

    pub fn error_threshold_percentage(mut self, value: f64) -> Self {
        self.error_threshold_percentage = Some(value);
        self
    }

    pub fn enable_health_checks(mut self, value: bool) -> Self {
        self.enable_health_checks = Some(value);
        self
    }

    pub fn call_timeout(mut self, value: Duration) -> Self {
        self.call_timeout = Some(value);
        self
    }
}
