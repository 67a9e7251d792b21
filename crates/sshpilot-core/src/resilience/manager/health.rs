//! Aggregated health reporting

use serde::Serialize;
use std::collections::BTreeMap;

use crate::resilience::{CircuitState, HealthStatus};

/// Health of every circuit owned by a manager
#[derive(Debug, Clone, Serialize)]
pub struct GlobalHealthStatus {
    pub total_circuits: usize,
    /// Closed and below the error-rate threshold
    pub healthy_circuits: usize,
    /// Half-open
    pub degraded_circuits: usize,
    /// Open, or closed above the error-rate threshold
    pub failed_circuits: usize,
    /// Mean availability percentage; 100 with no circuits
    pub overall_availability: f64,
    pub services: BTreeMap<String, HealthStatus>,
}

impl GlobalHealthStatus {
    pub(crate) fn from_services(services: BTreeMap<String, HealthStatus>) -> Self {
        let mut healthy_circuits = 0;
        let mut degraded_circuits = 0;
        let mut failed_circuits = 0;

        for status in services.values() {
            match (status.state, status.healthy) {
                (CircuitState::Closed, true) => healthy_circuits += 1,
                (CircuitState::HalfOpen, _) => degraded_circuits += 1,
                _ => failed_circuits += 1,
            }
        }

        let overall_availability = if services.is_empty() {
            100.0
        } else {
            services
                .values()
                .map(|status| status.metrics.availability)
                .sum::<f64>()
                / services.len() as f64
        };

        Self {
            total_circuits: services.len(),
            healthy_circuits,
            degraded_circuits,
            failed_circuits,
            overall_availability,
            services,
        }
    }

    /// Every circuit is healthy
    pub fn is_fully_healthy(&self) -> bool {
        self.healthy_circuits == self.total_circuits
    }

    /// Names of circuits counted as failed
    pub fn failed_services(&self) -> Vec<&str> {
        self.services
            .values()
            .filter(|status| !status.healthy && status.state != CircuitState::HalfOpen)
            .map(|status| status.service.as_str())
            .collect()
    }
}

/// Outcome of shutting a manager down
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Circuits whose timers stopped cleanly
    pub circuits_stopped: usize,
    /// (service, error) for circuits whose shutdown reported a problem
    pub failures: Vec<(String, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
