//! Observer installed on every managed circuit

use std::sync::Arc;

use super::dependency::DependencyGraph;
use crate::events::{CircuitEvent, CircuitObserver, EventKind, SharedObserver};

/// Forwards circuit events to the manager's sink and derives the
/// manager-level `cascade_warning` and `service_recovered` events
///
/// Holds only the graph and the sink, never the registry, so it can run while
/// the manager iterates its circuits.
pub(crate) struct CascadeWatcher {
    graph: Arc<DependencyGraph>,
    sink: SharedObserver,
}

impl CascadeWatcher {
    pub(crate) fn new(graph: Arc<DependencyGraph>, sink: SharedObserver) -> Self {
        Self { graph, sink }
    }
}

impl CircuitObserver for CascadeWatcher {
    fn on_event(&self, event: &CircuitEvent) {
        self.sink.on_event(event);
        match event.kind {
            EventKind::CircuitOpened => self.on_open(event),
            EventKind::CircuitClosed => self.on_close(event),
            _ => {}
        }
    }

    fn on_open(&self, event: &CircuitEvent) {
        let dependents = self.graph.required_dependents_of(&event.service);
        if dependents.is_empty() {
            return;
        }

        tracing::warn!(
            service = %event.service,
            dependents = ?dependents,
            "Required dependency opened, dependents at risk"
        );
        let warning = CircuitEvent::new(
            EventKind::CascadeWarning,
            &event.service,
            event.from,
            event.to,
            event.metrics.clone(),
        )
        .with_detail(format!("required by {}", dependents.join(", ")));
        self.sink.on_event(&warning);
    }

    fn on_close(&self, event: &CircuitEvent) {
        tracing::info!(service = %event.service, "Service recovered");
        let recovered = CircuitEvent::new(
            EventKind::ServiceRecovered,
            &event.service,
            event.from,
            event.to,
            event.metrics.clone(),
        );
        let recovered = match &event.detail {
            Some(detail) => recovered.with_detail(detail.clone()),
            None => recovered,
        };
        self.sink.on_event(&recovered);
    }
}
