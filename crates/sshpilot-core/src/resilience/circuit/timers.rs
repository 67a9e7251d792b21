//! Background health-check and failure-decay timers

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::breaker::Circuit;

/// Handles of a circuit's periodic tasks
pub(crate) struct TimerHandles {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TimerHandles {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel all tasks and wait for them; reports tasks that panicked
    pub(crate) async fn stop(self) -> Result<(), String> {
        self.cancel.cancel();

        let mut failures = Vec::new();
        for task in self.tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}

impl Circuit {
    /// Spawn the periodic tasks onto the current Tokio runtime, if any
    pub(super) fn start_timers(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                circuit = %self.name(),
                "No Tokio runtime, circuit timers not started"
            );
            return;
        };

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        let config = self.config();
        if config.enable_health_checks && !config.health_check_interval.is_zero() {
            tasks.push(handle.spawn(run_periodic(
                Arc::downgrade(self),
                config.health_check_interval,
                cancel.clone(),
                Circuit::health_check_tick,
            )));
        }
        if !config.reset_timeout.is_zero() {
            tasks.push(handle.spawn(run_periodic(
                Arc::downgrade(self),
                config.reset_timeout,
                cancel.clone(),
                Circuit::decay_tick,
            )));
        }

        self.set_timers(TimerHandles { cancel, tasks });
    }
}

/// Tick `action` every `period` until cancelled or the circuit is dropped
async fn run_periodic(
    circuit: Weak<Circuit>,
    period: Duration,
    cancel: CancellationToken,
    action: fn(&Circuit),
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(circuit) = circuit.upgrade() else {
                    break;
                };
                action(&circuit);
            }
        }
    }
}
