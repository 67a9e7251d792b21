//! Auto-recovery sweep for circuits stuck half-open

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::events::{CircuitEvent, CircuitObserver, EventKind, SharedObserver};
use crate::resilience::{Circuit, CircuitState};

pub(crate) type Registry = Arc<DashMap<String, Arc<Circuit>>>;

/// Handle of a running sweep task
pub(crate) struct RecoverySweep {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RecoverySweep {
    /// Spawn the sweep onto the current runtime; `None` outside a runtime
    pub(crate) fn spawn(
        circuits: Registry,
        sink: SharedObserver,
        interval: Duration,
        stuck_timeout: Duration,
    ) -> Option<Self> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let cancel = CancellationToken::new();
        let task = handle.spawn(run(
            circuits,
            sink,
            interval,
            stuck_timeout,
            cancel.clone(),
        ));
        Some(Self { cancel, task })
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to finish
    pub(crate) async fn stop(self) -> Result<(), String> {
        self.cancel.cancel();
        match self.task.await {
            Err(e) if e.is_panic() => Err(e.to_string()),
            _ => Ok(()),
        }
    }
}

async fn run(
    circuits: Registry,
    sink: SharedObserver,
    interval: Duration,
    stuck_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sweep_once(&circuits, sink.as_ref(), stuck_timeout);
            }
        }
    }
    tracing::debug!("Auto-recovery sweep stopped");
}

/// Reset every circuit half-open for at least `stuck_timeout`; returns their names
pub(crate) fn sweep_once(
    circuits: &DashMap<String, Arc<Circuit>>,
    sink: &dyn CircuitObserver,
    stuck_timeout: Duration,
) -> Vec<String> {
    // Snapshot first so no registry shard lock is held while resetting
    let candidates: Vec<Arc<Circuit>> = circuits
        .iter()
        .map(|entry| Arc::clone(entry.value()))
        .collect();

    let mut recovered = Vec::new();
    for circuit in candidates {
        let Some(elapsed) = circuit.reset_if_stuck(stuck_timeout) else {
            continue;
        };

        let event = CircuitEvent::new(
            EventKind::AutoRecoveryAttempted,
            circuit.name(),
            CircuitState::HalfOpen,
            circuit.state(),
            circuit.metrics(),
        )
        .with_detail(format!("half-open for {:?}", elapsed));
        sink.on_event(&event);

        recovered.push(circuit.name().to_string());
    }
    recovered.sort();
    recovered
}
