//! Structured events for observability
//!
//! Circuits and the manager report every transition and recorded outcome as a
//! [`CircuitEvent`] through an injected [`CircuitObserver`]. The core itself
//! never persists or prints events; sinks decide what to do with them.

mod observer;
mod types;


#[cfg(test)]
pub use observer::MockCircuitObserver;
pub(crate) use observer::dispatch;
pub use observer::{
    BroadcastObserver, CircuitObserver, NoopObserver, ObserverSet, SharedObserver,
    TracingObserver,
};
pub use types::{CircuitEvent, EventKind};
