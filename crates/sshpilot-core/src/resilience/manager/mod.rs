//! Registry of per-service circuits with dependency-aware cascading

mod dependency;
mod health;
mod recovery;
mod registry;
mod watcher;


pub use dependency::DependencyGraph;
pub use health::{GlobalHealthStatus, ShutdownReport};
pub use registry::ResilienceManager;
