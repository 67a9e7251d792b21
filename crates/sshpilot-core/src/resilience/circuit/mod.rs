//! Circuit breaker for a single service
//!
//! Closed -> Open when the consecutive-failure or error-rate threshold is
//! reached; Open -> HalfOpen once the (exponentially backed off) retry time
//! passes; HalfOpen -> Closed after enough consecutive successes, or back to
//! Open on any failure.

mod breaker;
mod metrics;
mod operation;
mod timers;
mod types;

#[cfg(test)]
mod tests;

pub use breaker::Circuit;
pub use metrics::MetricsSnapshot;
pub use operation::Operation;
pub use types::{CircuitState, HealthStatus};
