//! Request counters and latency tracking for a circuit

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::defaults::LATENCY_SAMPLE_CAPACITY;

/// Fixed-capacity ring of recent latencies, oldest evicted first
#[derive(Debug, Clone)]
pub(crate) struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, latency: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(LATENCY_SAMPLE_CAPACITY)
    }
}

/// Mutable counters owned by a circuit
///
/// Rates are computed over lifetime counters, not a sliding window.
#[derive(Debug, Clone, Default)]
pub(crate) struct CircuitMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    /// Reset by any success and by the decay timer
    pub current_failure_count: u32,
    /// Reset by any failure
    pub consecutive_successes: u32,
    pub state_changes: u64,
    pub last_failure_at: Option<Instant>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub latencies: LatencyWindow,
}

impl CircuitMetrics {
    pub(crate) fn record_success(&mut self, latency: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.current_failure_count = 0;
        self.last_success_time = Some(Utc::now());
        self.latencies.push(latency);
    }

    pub(crate) fn record_failure(&mut self, latency: Duration, now: Instant) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.current_failure_count = self.current_failure_count.saturating_add(1);
        self.consecutive_successes = 0;
        self.last_failure_at = Some(now);
        self.last_failure_time = Some(Utc::now());
        self.latencies.push(latency);
    }

    pub(crate) fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    pub(crate) fn availability(&self) -> f64 {
        // total = successful + failed, so this is successful / total * 100
        100.0 - self.error_rate() * 100.0
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            rejected_requests: self.rejected_requests,
            current_failure_count: self.current_failure_count,
            consecutive_successes: self.consecutive_successes,
            state_changes: self.state_changes,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
            error_rate: self.error_rate(),
            availability: self.availability(),
            average_response_time: self.latencies.average(),
            latency_samples: self.latencies.len(),
        }
    }
}

/// Point-in-time copy of a circuit's metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub current_failure_count: u32,
    pub consecutive_successes: u32,
    pub state_changes: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// failed / total, 0.0 before any request
    pub error_rate: f64,
    /// successful / total * 100, 100.0 before any request
    pub availability: f64,
    #[serde(with = "humantime_serde")]
    pub average_response_time: Duration,
    pub latency_samples: usize,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        CircuitMetrics::default().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_window_evicts_oldest() {
        let mut window = LatencyWindow::new(3);
        for ms in [100, 200, 300, 400] {
            window.push(Duration::from_millis(ms));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), Duration::from_millis(300));
    }

    #[test]
    fn test_default_window_is_capped_at_one_hundred() {
        let mut window = LatencyWindow::default();
        for _ in 0..250 {
            window.push(Duration::from_millis(5));
        }
        assert_eq!(window.len(), LATENCY_SAMPLE_CAPACITY);
    }

    #[test]
    fn test_rates_follow_counters() {
        let mut metrics = CircuitMetrics::default();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.availability, 100.0);

        let now = Instant::now();
        metrics.record_success(Duration::from_millis(10));
        metrics.record_failure(Duration::from_millis(30), now);
        metrics.record_failure(Duration::from_millis(20), now);
        metrics.record_success(Duration::from_millis(40));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.error_rate, 0.5);
        assert_eq!(snapshot.availability, 100.0 - snapshot.error_rate * 100.0);
        assert_eq!(snapshot.current_failure_count, 0);
        assert_eq!(snapshot.consecutive_successes, 1);
        assert_eq!(snapshot.average_response_time, Duration::from_millis(25));
    }
}
