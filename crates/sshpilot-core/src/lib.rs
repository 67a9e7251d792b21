//! sshpilot Core Library
//!
//! Resilience layer for the sshpilot automation server: per-service circuit
//! breakers, a manager that owns them and knows the dependencies between
//! services, and structured events describing every transition.

pub mod config;
pub mod error;
pub mod events;
pub mod resilience;

// Re-export commonly used types
pub use config::{CircuitConfig, DependencySpec, ResilienceConfig, ServiceOverrides};
pub use error::{ResilienceError, ResilienceResult};
pub use events::{
    BroadcastObserver, CircuitEvent, CircuitObserver, EventKind, NoopObserver, ObserverSet,
    SharedObserver, TracingObserver,
};
pub use resilience::{
    Circuit, CircuitState, DependencyGraph, GlobalHealthStatus, HealthStatus, MetricsSnapshot,
    Operation, ResilienceManager, ShutdownReport,
};
