//! Configuration for circuits and the resilience manager
//!
//! Durations are written in humantime form (`"30s"`, `"500ms"`) when
//! loaded from TOML.

mod circuit;
pub mod defaults;
mod resilience;

#[cfg(test)]
mod tests;

pub use circuit::{CircuitConfig, ServiceOverrides};
pub use resilience::{DependencySpec, ResilienceConfig};
