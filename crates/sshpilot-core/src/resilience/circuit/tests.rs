//! Tests for circuit breaker functionality

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use mockall::Sequence;

use super::{Circuit, CircuitState, Operation};
use crate::config::CircuitConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::events::{EventKind, MockCircuitObserver, NoopObserver};

fn config(failure_threshold: u32, success_threshold: u32) -> CircuitConfig {
    CircuitConfig {
        failure_threshold,
        success_threshold,
        timeout: Duration::from_secs(1),
        volume_threshold: 1_000,
        enable_health_checks: false,
        ..Default::default()
    }
}

fn quiet(config: CircuitConfig) -> Arc<Circuit> {
    Circuit::with_observer("ssh-connection", config, Arc::new(NoopObserver)).unwrap()
}

fn failing() -> Operation<'static, u32> {
    Operation::new(|| async { Err::<u32, _>(anyhow!("connection refused")) })
}

fn succeeding(value: u32) -> Operation<'static, u32> {
    Operation::new(move || async move { Ok::<u32, anyhow::Error>(value) })
}

fn counted(calls: &Arc<AtomicUsize>, succeed: bool) -> Operation<'static, u32> {
    let calls = Arc::clone(calls);
    Operation::new(move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        if succeed {
            Ok::<u32, anyhow::Error>(1)
        } else {
            Err(anyhow!("handshake failed"))
        }
    })
}

async fn fail_times(circuit: &Circuit, times: usize) {
    for _ in 0..times {
        let _ = circuit.execute(failing()).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_circuit_starts_closed() {
    let cb = quiet(CircuitConfig::default());
    let status = cb.health_status();

    assert_eq!(status.state, CircuitState::Closed);
    assert!(status.healthy);
    assert_eq!(status.backoff_multiplier, 1);
    assert!(status.next_retry_time.is_none());
    assert_eq!(status.metrics.total_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_after_failures() {
    let cb = quiet(CircuitConfig {
        exponential_backoff: true,
        ..config(3, 2)
    });

    fail_times(&cb, 2).await;
    assert_eq!(cb.state(), CircuitState::Closed);

    fail_times(&cb, 1).await;
    let status = cb.health_status();
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.backoff_multiplier, 2);
    let retry_after = status.retry_after.unwrap();
    assert!(retry_after <= Duration::from_secs(1));
    assert!(retry_after >= Duration::from_millis(999));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_does_not_invoke_run() {
    let cb = quiet(config(3, 2));
    fail_times(&cb, 3).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let err = cb.execute(counted(&calls, true)).await.unwrap_err();

    assert!(matches!(err, ResilienceError::CircuitOpen { .. }));
    assert!(err.is_retryable());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let metrics = cb.metrics();
    assert_eq!(metrics.rejected_requests, 1);
    assert_eq!(metrics.total_requests, 3);
}

#[tokio::test(start_paused = true)]
async fn test_failure_threshold_of_one_opens_immediately() {
    let cb = quiet(config(1, 1));
    fail_times(&cb, 1).await;
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_with_doubled_delay() {
    let cb = quiet(config(3, 2));
    fail_times(&cb, 3).await;
    assert_eq!(cb.backoff_multiplier(), 2);

    tokio::time::advance(Duration::from_millis(1_001)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let err = cb.execute(counted(&calls, false)).await.unwrap_err();
    assert!(matches!(err, ResilienceError::OperationFailed { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let status = cb.health_status();
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.backoff_multiplier, 4);
    let retry_after = status.retry_after.unwrap();
    assert!(retry_after > Duration::from_millis(1_999));
    assert!(retry_after <= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_circuit_closes_after_successes() {
    let cb = quiet(config(3, 2));
    fail_times(&cb, 3).await;
    tokio::time::advance(Duration::from_millis(1_001)).await;

    assert_eq!(cb.execute(succeeding(7)).await.unwrap(), 7);
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    assert_eq!(cb.execute(succeeding(8)).await.unwrap(), 8);
    let status = cb.health_status();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.backoff_multiplier, 1);
    assert_eq!(status.metrics.current_failure_count, 0);
    assert!(status.next_retry_time.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_error_rate_opens_circuit() {
    let cb = quiet(CircuitConfig {
        volume_threshold: 10,
        error_threshold_percentage: 0.5,
        ..config(100, 2)
    });

    for _ in 0..4 {
        cb.execute(succeeding(1)).await.unwrap();
        let _ = cb.execute(failing()).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }
    cb.execute(succeeding(1)).await.unwrap();
    let _ = cb.execute(failing()).await;

    let metrics = cb.metrics();
    assert_eq!(metrics.total_requests, 10);
    assert_eq!(metrics.error_rate, 0.5);
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_volume_threshold_not_reached_uses_count_only() {
    let cb = quiet(CircuitConfig {
        volume_threshold: 50,
        error_threshold_percentage: 0.1,
        ..config(3, 2)
    });

    for _ in 0..10 {
        cb.execute(succeeding(1)).await.unwrap();
        fail_times(&cb, 2).await;
    }
    assert_eq!(cb.state(), CircuitState::Closed);
    assert!(cb.metrics().error_rate > 0.6);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let cb = quiet(config(1, 1));
    let op = Operation::new(|| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<u32, anyhow::Error>(1)
    })
    .with_timeout(Duration::from_millis(100));

    let err = cb.execute(op).await.unwrap_err();
    match err {
        ResilienceError::Timeout { timeout, .. } => {
            assert_eq!(timeout, Duration::from_millis(100))
        }
        other => panic!("expected timeout, got {other}"),
    }
    assert_eq!(cb.metrics().failed_requests, 1);
    assert_eq!(cb.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_defaults_to_config() {
    let cb = quiet(CircuitConfig {
        call_timeout: Some(Duration::from_millis(250)),
        ..config(5, 1)
    });
    let op = Operation::new(|| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<u32, anyhow::Error>(1)
    });

    let err = cb.execute(op).await.unwrap_err();
    assert!(matches!(err, ResilienceError::Timeout { timeout, .. } if timeout == Duration::from_millis(250)));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_answers_failures_and_rejections() {
    let cb = quiet(config(1, 1));

    let value = cb
        .execute(failing().with_fallback(|| async { Ok::<u32, anyhow::Error>(99) }))
        .await
        .unwrap();
    assert_eq!(value, 99);
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.metrics().failed_requests, 1);

    let calls = Arc::new(AtomicUsize::new(0));
    let value = cb
        .execute(counted(&calls, true).with_fallback(|| async { Ok::<u32, anyhow::Error>(42) }))
        .await
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(cb.metrics().rejected_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_fallback_keeps_both_errors() {
    let cb = quiet(config(5, 1));
    let op = failing().with_fallback(|| async { Err::<u32, _>(anyhow!("no cached result")) });

    match cb.execute(op).await.unwrap_err() {
        ResilienceError::FallbackFailed {
            primary, fallback, ..
        } => {
            assert!(matches!(*primary, ResilienceError::OperationFailed { .. }));
            assert!(primary.to_string().contains("connection refused"));
            assert_eq!(fallback.to_string(), "no cached result");
        }
        other => panic!("expected composite error, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_multiplier_is_capped() {
    let cb = quiet(CircuitConfig {
        max_backoff_time: Duration::from_secs(4),
        ..config(1, 1)
    });

    let mut previous = 1;
    for _ in 0..6 {
        fail_times(&cb, 1).await;
        let status = cb.health_status();
        assert_eq!(status.state, CircuitState::Open);
        assert!(status.backoff_multiplier >= previous);
        assert!(status.backoff_multiplier <= 4);
        assert!(status.retry_after.unwrap() <= Duration::from_secs(4));
        previous = status.backoff_multiplier;

        tokio::time::advance(status.retry_after.unwrap() + Duration::from_millis(1)).await;
    }
    assert_eq!(cb.backoff_multiplier(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_no_backoff_growth_without_exponential_backoff() {
    let cb = quiet(CircuitConfig {
        exponential_backoff: false,
        ..config(1, 1)
    });

    fail_times(&cb, 1).await;
    tokio::time::advance(Duration::from_millis(1_001)).await;
    fail_times(&cb, 1).await;

    assert_eq!(cb.backoff_multiplier(), 1);
    assert!(cb.health_status().retry_after.unwrap() <= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_manual_open_close() {
    let cb = quiet(config(5, 1));

    cb.open();
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.backoff_multiplier(), 1);
    assert!(matches!(
        cb.execute(succeeding(1)).await,
        Err(ResilienceError::CircuitOpen { .. })
    ));

    cb.close();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.execute(succeeding(3)).await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_reset_returns_to_baseline() {
    let cb = quiet(config(2, 1));
    cb.execute(succeeding(1)).await.unwrap();
    fail_times(&cb, 3).await;
    assert_eq!(cb.state(), CircuitState::Open);

    cb.reset();

    let fresh = quiet(config(2, 1));
    let status = cb.health_status();
    let baseline = fresh.health_status();
    assert_eq!(status.state, baseline.state);
    assert_eq!(status.backoff_multiplier, baseline.backoff_multiplier);
    assert_eq!(status.next_retry_time, None);
    assert_eq!(status.metrics, baseline.metrics);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_moves_to_half_open_eagerly() {
    let cb = quiet(CircuitConfig {
        enable_health_checks: true,
        health_check_interval: Duration::from_millis(100),
        ..config(1, 1)
    });

    fail_times(&cb, 1).await;
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(1_150)).await;
    assert_eq!(cb.state(), CircuitState::HalfOpen);
    assert!(cb.health_status().next_retry_time.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stale_failure_count_decays() {
    let cb = quiet(CircuitConfig {
        reset_timeout: Duration::from_secs(1),
        ..config(3, 1)
    });

    fail_times(&cb, 2).await;
    assert_eq!(cb.metrics().current_failure_count, 2);

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    let metrics = cb.metrics();
    assert_eq!(metrics.current_failure_count, 0);
    assert_eq!(metrics.failed_requests, 2);

    fail_times(&cb, 2).await;
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_execute_after_shutdown_fails() {
    let cb = quiet(CircuitConfig {
        enable_health_checks: true,
        ..config(3, 1)
    });

    cb.shutdown().await.unwrap();
    assert!(cb.is_shut_down());
    // Idempotent
    cb.shutdown().await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let err = cb.execute(counted(&calls, true)).await.unwrap_err();
    assert!(matches!(err, ResilienceError::ShutDown { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_trip_once() {
    let cb = quiet(config(1, 1));
    let barrier = Arc::new(tokio::sync::Barrier::new(8));

    let circuit: &Circuit = &cb;
    let calls = (0..8).map(move |_| {
        let barrier = Arc::clone(&barrier);
        circuit.execute(Operation::new(move || async move {
            barrier.wait().await;
            Err::<u32, _>(anyhow!("reset by peer"))
        }))
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| r.is_err()));
    let status = cb.health_status();
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.backoff_multiplier, 2);
    assert_eq!(status.metrics.state_changes, 1);
    assert_eq!(status.metrics.failed_requests, 8);
}

#[tokio::test(start_paused = true)]
async fn test_transition_events_are_emitted_once() {
    let mut observer = MockCircuitObserver::new();
    observer
        .expect_on_event()
        .withf(|e| e.kind == EventKind::FailureRecorded)
        .times(2)
        .return_const(());
    observer
        .expect_on_event()
        .withf(|e| {
            e.kind == EventKind::StateChange
                && e.from == CircuitState::Closed
                && e.to == CircuitState::Open
        })
        .times(1)
        .return_const(());
    observer
        .expect_on_event()
        .withf(|e| e.kind == EventKind::CircuitOpened && e.service == "ssh-connection")
        .times(1)
        .return_const(());

    let cb = Circuit::with_observer("ssh-connection", config(2, 1), Arc::new(observer)).unwrap();
    fail_times(&cb, 2).await;

    // Rejections emit nothing
    let _ = cb.execute(succeeding(1)).await;
    assert_eq!(cb.state(), CircuitState::Open);
}

/// Expect exactly one event, in order, identified by kind, states and request count
fn expect_next(
    observer: &mut MockCircuitObserver,
    seq: &mut Sequence,
    kind: EventKind,
    from: CircuitState,
    to: CircuitState,
    total_requests: u64,
) {
    observer
        .expect_on_event()
        .withf(move |e| {
            e.kind == kind
                && e.from == from
                && e.to == to
                && e.metrics.total_requests == total_requests
        })
        .times(1)
        .in_sequence(seq)
        .return_const(());
}

#[tokio::test(start_paused = true)]
async fn test_outcome_then_transition_then_announcement() {
    use CircuitState::{Closed, HalfOpen, Open};

    let mut observer = MockCircuitObserver::new();
    let mut seq = Sequence::new();
    let expected = [
        (EventKind::FailureRecorded, Closed, Closed, 1),
        (EventKind::FailureRecorded, Closed, Closed, 2),
        (EventKind::StateChange, Closed, Open, 2),
        (EventKind::CircuitOpened, Closed, Open, 2),
        (EventKind::StateChange, Open, HalfOpen, 2),
        (EventKind::RecoveryAttempt, Open, HalfOpen, 2),
        (EventKind::SuccessRecorded, HalfOpen, HalfOpen, 3),
        (EventKind::SuccessRecorded, HalfOpen, HalfOpen, 4),
        (EventKind::StateChange, HalfOpen, Closed, 4),
        (EventKind::CircuitClosed, HalfOpen, Closed, 4),
    ];
    for (kind, from, to, total) in expected {
        expect_next(&mut observer, &mut seq, kind, from, to, total);
    }

    let cb = Circuit::with_observer("ssh-connection", config(2, 2), Arc::new(observer)).unwrap();
    fail_times(&cb, 2).await;
    tokio::time::advance(Duration::from_millis(1_001)).await;
    cb.execute(succeeding(1)).await.unwrap();
    cb.execute(succeeding(2)).await.unwrap();

    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_reset_leaves_reopened_circuit_alone() {
    let cb = quiet(config(1, 5));
    fail_times(&cb, 1).await;
    tokio::time::advance(Duration::from_millis(1_001)).await;
    cb.execute(succeeding(1)).await.unwrap();
    assert_eq!(cb.state(), CircuitState::HalfOpen);
    assert_eq!(cb.reset_if_stuck(Duration::from_secs(10)), None);

    // The trial fails before the sweep gets to it
    tokio::time::advance(Duration::from_secs(10)).await;
    fail_times(&cb, 1).await;
    assert_eq!(cb.reset_if_stuck(Duration::from_secs(10)), None);
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(cb.backoff_multiplier(), 4);

    tokio::time::advance(Duration::from_millis(2_001)).await;
    cb.execute(succeeding(2)).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(
        cb.reset_if_stuck(Duration::from_secs(10)),
        Some(Duration::from_secs(10))
    );
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.backoff_multiplier(), 1);
}

/// Forwards without adding bounds on `T`
async fn forward<T>(circuit: &Circuit, operation: Operation<'_, T>) -> ResilienceResult<T> {
    assert!(operation.has_fallback() || operation.timeout().is_none());
    circuit.execute(operation).await
}

#[tokio::test(start_paused = true)]
async fn test_execute_from_generic_caller() {
    let cb = quiet(config(1, 1));
    assert_eq!(forward(&cb, succeeding(5)).await.unwrap(), 5);

    let value = forward(
        &cb,
        failing().with_fallback(|| async { Ok::<u32, anyhow::Error>(6) }),
    )
    .await
    .unwrap();
    assert_eq!(value, 6);
}

#[tokio::test(start_paused = true)]
async fn test_constructor_rejects_invalid_config() {
    let err = Circuit::with_observer(
        "ssh-connection",
        CircuitConfig {
            success_threshold: 0,
            ..config(3, 1)
        },
        Arc::new(NoopObserver),
    )
    .unwrap_err();
    assert!(matches!(err, ResilienceError::InvalidConfig(_)));
    assert!(err.to_string().contains("success_threshold"));
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_while_closed_above_error_rate() {
    let cb = quiet(CircuitConfig {
        error_threshold_percentage: 0.3,
        ..config(10, 1)
    });

    cb.execute(succeeding(1)).await.unwrap();
    fail_times(&cb, 1).await;

    let status = cb.health_status();
    assert_eq!(status.state, CircuitState::Closed);
    assert!(!status.healthy);
    assert_eq!(
        status.metrics.availability,
        100.0 - status.metrics.error_rate * 100.0
    );
}
