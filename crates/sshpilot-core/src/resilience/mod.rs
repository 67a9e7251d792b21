//! Circuit breakers and the manager that coordinates them
//!
//! A [`Circuit`] guards one logical remote operation type; the
//! [`ResilienceManager`] owns one circuit per configured service, knows the
//! dependencies between them and propagates failures one hop along required
//! dependencies.

pub mod circuit;
pub mod manager;

pub use circuit::{Circuit, CircuitState, HealthStatus, MetricsSnapshot, Operation};
pub use manager::{DependencyGraph, GlobalHealthStatus, ResilienceManager, ShutdownReport};
