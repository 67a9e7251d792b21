//! Circuit breaker state machine

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::metrics::{CircuitMetrics, MetricsSnapshot};
use super::operation::{Call, Operation};
use super::timers::TimerHandles;
use super::types::{CircuitState, HealthStatus};
use crate::config::CircuitConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::events::{self, CircuitEvent, EventKind, SharedObserver, TracingObserver};

/// Mutable state of a circuit, always accessed under one lock
#[derive(Debug)]
struct CircuitCore {
    state: CircuitState,
    metrics: CircuitMetrics,
    backoff_multiplier: u32,
    /// Only set while open
    next_retry_at: Option<Instant>,
    state_entered_at: Instant,
    last_state_change: DateTime<Utc>,
}

impl CircuitCore {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            metrics: CircuitMetrics::default(),
            backoff_multiplier: 1,
            next_retry_at: None,
            state_entered_at: Instant::now(),
            last_state_change: Utc::now(),
        }
    }
}

/// Outcome of the admission check at the start of `execute`
enum Admission {
    Proceed,
    Reject { retry_after: Duration },
}

/// Circuit breaker protecting one logical remote operation type
pub struct Circuit {
    /// Service name (for logging and events)
    name: String,
    config: CircuitConfig,
    core: Mutex<CircuitCore>,
    observer: SharedObserver,
    shut_down: AtomicBool,
    timers: Mutex<Option<TimerHandles>>,
}

impl Circuit {
    /// Create a circuit that reports events to `tracing`
    ///
    /// Background timers start immediately when called inside a Tokio runtime.
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> ResilienceResult<Arc<Self>> {
        Self::with_observer(name, config, Arc::new(TracingObserver))
    }

    /// Create a circuit with a custom event observer
    ///
    /// Fails with `InvalidConfig` when `config` does not validate.
    pub fn with_observer(
        name: impl Into<String>,
        config: CircuitConfig,
        observer: SharedObserver,
    ) -> ResilienceResult<Arc<Self>> {
        config.validate()?;
        let circuit = Arc::new(Self {
            name: name.into(),
            config,
            core: Mutex::new(CircuitCore::new()),
            observer,
            shut_down: AtomicBool::new(false),
            timers: Mutex::new(None),
        });
        circuit.start_timers();
        Ok(circuit)
    }

    /// Get the service name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state; never triggers a transition
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.lock().metrics.snapshot()
    }

    pub fn backoff_multiplier(&self) -> u32 {
        self.core.lock().backoff_multiplier
    }

    /// Closed and below the error-rate threshold
    pub fn is_healthy(&self) -> bool {
        let core = self.core.lock();
        self.healthy(&core)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// While open and before the retry time the operation is not invoked; the
    /// fallback (if any) answers instead. Otherwise the operation races its
    /// timeout, the outcome is recorded, and a failure falls through to the
    /// fallback.
    pub async fn execute<T>(&self, operation: Operation<'_, T>) -> ResilienceResult<T> {
        if self.is_shut_down() {
            return Err(ResilienceError::ShutDown {
                service: self.name.clone(),
            });
        }

        let (run, fallback, timeout_override) = operation.into_parts();

        if let Admission::Reject { retry_after } = self.admit() {
            tracing::debug!(
                circuit = %self.name,
                retry_after = ?retry_after,
                "Call rejected by open circuit"
            );
            let rejection = self.open_error(retry_after);
            return self.run_fallback(fallback, rejection).await;
        }

        let limit = timeout_override.unwrap_or_else(|| self.config.effective_call_timeout());
        let started = Instant::now();
        let outcome = tokio::time::timeout(limit, run()).await;
        let elapsed = started.elapsed();

        let primary = match outcome {
            Ok(Ok(value)) => {
                self.record_success(elapsed);
                return Ok(value);
            }
            Ok(Err(source)) => {
                self.record_failure(elapsed);
                ResilienceError::OperationFailed {
                    service: self.name.clone(),
                    source,
                }
            }
            Err(_) => {
                self.record_failure(elapsed);
                ResilienceError::Timeout {
                    service: self.name.clone(),
                    timeout: limit,
                }
            }
        };

        self.run_fallback(fallback, primary).await
    }

    /// Record a successful call made outside `execute`
    pub fn record_success(&self, latency: Duration) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            let now = Instant::now();
            core.metrics.record_success(latency);
            events.push(self.event(&core, EventKind::SuccessRecorded, core.state));

            if core.state == CircuitState::HalfOpen
                && core.metrics.consecutive_successes >= self.config.success_threshold
            {
                let detail = format!(
                    "closed after {} consecutive successes",
                    core.metrics.consecutive_successes
                );
                self.enter_closed(&mut core, now, &mut events, detail);
            }
        }
        events::dispatch(self.observer.as_ref(), events);
    }

    /// Record a failed call made outside `execute`
    pub fn record_failure(&self, latency: Duration) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            let now = Instant::now();
            core.metrics.record_failure(latency, now);
            events.push(self.event(&core, EventKind::FailureRecorded, core.state));

            match core.state {
                CircuitState::Closed => {
                    if let Some(reason) = self.trip_reason(&core.metrics) {
                        self.enter_open(&mut core, now, true, &mut events, reason);
                    }
                }
                CircuitState::HalfOpen => {
                    // Any failure during the trial re-opens the circuit
                    self.enter_open(
                        &mut core,
                        now,
                        true,
                        &mut events,
                        "trial call failed".to_string(),
                    );
                }
                CircuitState::Open => {
                    // Already open; a late failure must not re-apply backoff
                }
            }
        }
        events::dispatch(self.observer.as_ref(), events);
    }

    /// Snapshot of state and metrics; never triggers a transition
    pub fn health_status(&self) -> HealthStatus {
        let core = self.core.lock();
        let now = Instant::now();
        let metrics = core.metrics.snapshot();
        let healthy = self.healthy(&core);
        let retry_after = match core.state {
            CircuitState::Open => core
                .next_retry_at
                .map(|at| at.saturating_duration_since(now)),
            _ => None,
        };

        let message = match core.state {
            CircuitState::Closed if healthy => "Circuit closed, operating normally".to_string(),
            CircuitState::Closed => format!(
                "Circuit closed but error rate {:.1}% exceeds threshold {:.1}%",
                metrics.error_rate * 100.0,
                self.config.error_threshold_percentage * 100.0
            ),
            CircuitState::Open => match retry_after {
                Some(wait) if !wait.is_zero() => {
                    format!("Circuit open, next probe in {:?}", wait)
                }
                _ => "Circuit open, next call will probe for recovery".to_string(),
            },
            CircuitState::HalfOpen => format!(
                "Circuit half-open, {}/{} successful trial calls",
                metrics.consecutive_successes, self.config.success_threshold
            ),
        };

        HealthStatus {
            service: self.name.clone(),
            state: core.state,
            healthy,
            metrics,
            backoff_multiplier: core.backoff_multiplier,
            last_state_change: core.last_state_change,
            next_retry_time: retry_after.map(wall_clock_after),
            retry_after,
            message,
        }
    }

    /// Manually open the circuit, bypassing thresholds
    ///
    /// The retry time follows the current backoff multiplier, which is not
    /// escalated by a manual trip.
    pub fn open(&self) {
        self.force_open("opened manually".to_string());
    }

    pub(crate) fn force_open(&self, reason: String) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            let now = Instant::now();
            if core.state == CircuitState::Open {
                core.next_retry_at = Some(now + self.retry_delay(core.backoff_multiplier));
            } else {
                self.enter_open(&mut core, now, false, &mut events, reason);
            }
        }
        events::dispatch(self.observer.as_ref(), events);
    }

    /// Manually close the circuit
    pub fn close(&self) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            let now = Instant::now();
            self.enter_closed(&mut core, now, &mut events, "closed manually".to_string());
        }
        events::dispatch(self.observer.as_ref(), events);
    }

    /// Return to the baseline of a freshly constructed circuit
    pub fn reset(&self) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            self.reset_core(&mut core, &mut events);
        }
        tracing::info!(circuit = %self.name, "Circuit breaker reset");
        events::dispatch(self.observer.as_ref(), events);
    }

    /// Reset only if half-open for at least `min`; returns how long it was
    ///
    /// The state check and the reset happen under one lock, so a trial call that
    /// reopened the circuit in the meantime is left alone.
    pub(crate) fn reset_if_stuck(&self, min: Duration) -> Option<Duration> {
        let mut events = Vec::new();
        let elapsed = {
            let mut core = self.core.lock();
            if core.state != CircuitState::HalfOpen {
                return None;
            }
            let elapsed = Instant::now().saturating_duration_since(core.state_entered_at);
            if elapsed < min {
                return None;
            }
            self.reset_core(&mut core, &mut events);
            elapsed
        };
        tracing::warn!(
            circuit = %self.name,
            half_open_for = ?elapsed,
            "Circuit stuck half-open, forced reset"
        );
        events::dispatch(self.observer.as_ref(), events);
        Some(elapsed)
    }

    /// Stop background timers; later `execute` calls fail with `ShutDown`
    pub async fn shutdown(&self) -> ResilienceResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let timers = self.timers.lock().take();
        let result = match timers {
            Some(timers) => timers.stop().await.map_err(|message| ResilienceError::TaskFailed {
                service: self.name.clone(),
                message,
            }),
            None => Ok(()),
        };

        tracing::debug!(circuit = %self.name, "Circuit breaker shut down");
        result
    }

    /// Open -> half-open once the retry time has passed (health-check tick)
    pub(crate) fn health_check_tick(&self) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            let now = Instant::now();
            events.push(self.event(&core, EventKind::HealthCheck, core.state));
            if core.state == CircuitState::Open
                && core.next_retry_at.is_none_or(|at| now >= at)
            {
                self.enter_half_open(&mut core, now, &mut events, "health check");
            }
        }
        tracing::trace!(circuit = %self.name, "Health check tick");
        events::dispatch(self.observer.as_ref(), events);
    }

    /// Forget a stale failure count while closed (reset-decay tick)
    pub(crate) fn decay_tick(&self) {
        let mut core = self.core.lock();
        if core.state != CircuitState::Closed || core.metrics.current_failure_count == 0 {
            return;
        }

        let now = Instant::now();
        let stale = core
            .metrics
            .last_failure_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.reset_timeout);
        if stale {
            tracing::debug!(
                circuit = %self.name,
                failures = core.metrics.current_failure_count,
                "Clearing stale failure count"
            );
            core.metrics.current_failure_count = 0;
        }
    }

    pub(crate) fn set_timers(&self, timers: TimerHandles) {
        *self.timers.lock() = Some(timers);
    }

    fn admit(&self) -> Admission {
        let mut events = Vec::new();
        let admission = {
            let mut core = self.core.lock();
            let now = Instant::now();
            match (core.state, core.next_retry_at) {
                (CircuitState::Open, Some(at)) if now < at => {
                    core.metrics.rejected_requests += 1;
                    Admission::Reject {
                        retry_after: at - now,
                    }
                }
                (CircuitState::Open, _) => {
                    self.enter_half_open(&mut core, now, &mut events, "retry time reached");
                    Admission::Proceed
                }
                _ => Admission::Proceed,
            }
        };
        events::dispatch(self.observer.as_ref(), events);
        admission
    }

    async fn run_fallback<T>(
        &self,
        fallback: Option<Call<'_, T>>,
        primary: ResilienceError,
    ) -> ResilienceResult<T> {
        let Some(fallback) = fallback else {
            return Err(primary);
        };

        match fallback().await {
            Ok(value) => {
                tracing::debug!(circuit = %self.name, cause = %primary, "Served by fallback");
                Ok(value)
            }
            Err(fallback) => Err(ResilienceError::FallbackFailed {
                service: self.name.clone(),
                primary: Box::new(primary),
                fallback,
            }),
        }
    }

    fn reset_core(&self, core: &mut CircuitCore, events: &mut Vec<CircuitEvent>) {
        let from = core.state;
        *core = CircuitCore::new();

        if from != CircuitState::Closed {
            events.push(
                self.transition_event(core, EventKind::StateChange, from)
                    .with_detail("reset"),
            );
            events.push(
                self.transition_event(core, EventKind::CircuitClosed, from)
                    .with_detail("reset"),
            );
        }
    }

    fn open_error(&self, retry_after: Duration) -> ResilienceError {
        ResilienceError::CircuitOpen {
            service: self.name.clone(),
            next_retry_at: wall_clock_after(retry_after),
            retry_after,
        }
    }

    fn healthy(&self, core: &CircuitCore) -> bool {
        core.state == CircuitState::Closed
            && (core.metrics.total_requests == 0
                || core.metrics.error_rate() < self.config.error_threshold_percentage)
    }

    /// Why a closed circuit should open after the failure just recorded
    fn trip_reason(&self, metrics: &CircuitMetrics) -> Option<String> {
        if metrics.current_failure_count >= self.config.failure_threshold {
            return Some(format!(
                "{} consecutive failures reached threshold {}",
                metrics.current_failure_count, self.config.failure_threshold
            ));
        }

        let error_rate = metrics.error_rate();
        if metrics.total_requests >= self.config.volume_threshold
            && error_rate >= self.config.error_threshold_percentage
        {
            return Some(format!(
                "error rate {:.1}% over {} requests reached threshold {:.1}%",
                error_rate * 100.0,
                metrics.total_requests,
                self.config.error_threshold_percentage * 100.0
            ));
        }
        None
    }

    fn retry_delay(&self, multiplier: u32) -> Duration {
        self.config
            .timeout
            .saturating_mul(multiplier)
            .min(self.config.max_backoff_time)
    }

    fn enter_open(
        &self,
        core: &mut CircuitCore,
        now: Instant,
        escalate: bool,
        events: &mut Vec<CircuitEvent>,
        reason: String,
    ) {
        let from = core.state;
        let delay = self.retry_delay(core.backoff_multiplier);
        core.next_retry_at = Some(now + delay);
        if escalate && self.config.exponential_backoff {
            core.backoff_multiplier = core
                .backoff_multiplier
                .saturating_mul(2)
                .min(self.config.max_backoff_multiplier());
        }
        self.set_state(core, CircuitState::Open, now);

        tracing::warn!(
            circuit = %self.name,
            from = %from,
            retry_after = ?delay,
            backoff_multiplier = core.backoff_multiplier,
            "Circuit breaker opened: {}",
            reason
        );

        events.push(
            self.transition_event(core, EventKind::StateChange, from)
                .with_detail(reason.clone()),
        );
        events.push(
            self.transition_event(core, EventKind::CircuitOpened, from)
                .with_detail(format!("{}; next probe in {:?}", reason, delay)),
        );
    }

    fn enter_half_open(
        &self,
        core: &mut CircuitCore,
        now: Instant,
        events: &mut Vec<CircuitEvent>,
        trigger: &str,
    ) {
        let from = core.state;
        core.next_retry_at = None;
        self.set_state(core, CircuitState::HalfOpen, now);

        tracing::info!(
            circuit = %self.name,
            trigger,
            "Circuit breaker transitioning to half-open"
        );

        events.push(
            self.transition_event(core, EventKind::StateChange, from)
                .with_detail(trigger),
        );
        events.push(
            self.transition_event(core, EventKind::RecoveryAttempt, from)
                .with_detail(trigger),
        );
    }

    fn enter_closed(
        &self,
        core: &mut CircuitCore,
        now: Instant,
        events: &mut Vec<CircuitEvent>,
        reason: String,
    ) {
        let from = core.state;
        core.metrics.current_failure_count = 0;
        core.backoff_multiplier = 1;
        core.next_retry_at = None;
        if from == CircuitState::Closed {
            return;
        }
        self.set_state(core, CircuitState::Closed, now);

        tracing::info!(circuit = %self.name, from = %from, "Circuit breaker closed: {}", reason);

        events.push(
            self.transition_event(core, EventKind::StateChange, from)
                .with_detail(reason.clone()),
        );
        events.push(
            self.transition_event(core, EventKind::CircuitClosed, from)
                .with_detail(reason),
        );
    }

    fn set_state(&self, core: &mut CircuitCore, state: CircuitState, now: Instant) {
        core.state = state;
        core.state_entered_at = now;
        core.last_state_change = Utc::now();
        core.metrics.state_changes += 1;
    }

    /// Event about the current state, without a transition
    fn event(&self, core: &CircuitCore, kind: EventKind, state: CircuitState) -> CircuitEvent {
        CircuitEvent::new(kind, &self.name, state, state, core.metrics.snapshot())
    }

    /// Event about a transition from `from` into the current state
    fn transition_event(
        &self,
        core: &CircuitCore,
        kind: EventKind,
        from: CircuitState,
    ) -> CircuitEvent {
        CircuitEvent::new(kind, &self.name, from, core.state, core.metrics.snapshot())
    }
}

impl Drop for Circuit {
    fn drop(&mut self) {
        if let Some(timers) = self.timers.get_mut().take() {
            timers.cancel();
        }
    }
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Wall-clock time `delay` from now, for reporting
fn wall_clock_after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}
