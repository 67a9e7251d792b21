//! Observer interface for circuit events and the stock observers

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::{CircuitEvent, EventKind};

/// Receives structured events from circuits and the manager
///
/// Called synchronously on the thread that made the transition, after the
/// circuit's internal lock has been released. Implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait CircuitObserver: Send + Sync {
    /// Receives every event; routes transitions to the narrower hooks by default
    fn on_event(&self, event: &CircuitEvent) {
        match event.kind {
            EventKind::StateChange => self.on_state_change(event),
            EventKind::CircuitOpened => self.on_open(event),
            EventKind::CircuitClosed => self.on_close(event),
            _ => {}
        }
    }

    fn on_state_change(&self, _event: &CircuitEvent) {}

    fn on_open(&self, _event: &CircuitEvent) {}

    fn on_close(&self, _event: &CircuitEvent) {}
}

/// Shared observer handle
pub type SharedObserver = Arc<dyn CircuitObserver>;

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CircuitObserver for NoopObserver {}

/// Observer that forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CircuitObserver for TracingObserver {
    fn on_event(&self, event: &CircuitEvent) {
        let service = event.service.as_str();
        let from = event.from.as_str();
        let to = event.to.as_str();
        let detail = event.detail.as_deref().unwrap_or("");

        match event.kind {
            EventKind::CircuitOpened | EventKind::CascadeWarning => {
                tracing::warn!(service, from, to, detail, event = %event.kind, "Circuit event");
            }
            EventKind::StateChange
            | EventKind::CircuitClosed
            | EventKind::RecoveryAttempt
            | EventKind::ServiceRecovered
            | EventKind::AutoRecoveryAttempted => {
                tracing::info!(service, from, to, detail, event = %event.kind, "Circuit event");
            }
            EventKind::FailureRecorded | EventKind::SuccessRecorded => {
                tracing::debug!(
                    service,
                    state = to,
                    failures = event.metrics.current_failure_count,
                    event = %event.kind,
                    "Circuit event"
                );
            }
            EventKind::HealthCheck => {
                tracing::trace!(service, state = to, event = %event.kind, "Circuit event");
            }
        }
    }
}

/// Observer that republishes events on a broadcast channel
///
/// Lagging subscribers lose the oldest events; publishing never blocks.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<CircuitEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(256)
    }
}

impl CircuitObserver for BroadcastObserver {
    fn on_event(&self, event: &CircuitEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
    }
}

/// Fans events out to several observers in registration order
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<SharedObserver>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: SharedObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: SharedObserver) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl CircuitObserver for ObserverSet {
    fn on_event(&self, event: &CircuitEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Deliver a batch of events collected while a circuit was locked
pub(crate) fn dispatch(observer: &dyn CircuitObserver, events: Vec<CircuitEvent>) {
    for event in events {
        observer.on_event(&event);
    }
}
