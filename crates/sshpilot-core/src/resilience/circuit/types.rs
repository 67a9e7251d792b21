//! Circuit state and health status types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::metrics::MetricsSnapshot;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, operations proceed normally
    Closed,
    /// Circuit is open, operations are rejected
    Open,
    /// Circuit is half-open, trial operations probe for recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of a circuit's state and metrics
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub service: String,
    pub state: CircuitState,
    /// Closed and below the error-rate threshold
    pub healthy: bool,
    pub metrics: MetricsSnapshot,
    pub backoff_multiplier: u32,
    pub last_state_change: DateTime<Utc>,
    /// Only set while open
    pub next_retry_time: Option<DateTime<Utc>>,
    /// Time left until a probe is admitted, only set while open
    #[serde(with = "humantime_serde")]
    pub retry_after: Option<Duration>,
    pub message: String,
}
