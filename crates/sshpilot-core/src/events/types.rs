//! Event types emitted by circuits and the manager

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::resilience::{CircuitState, MetricsSnapshot};

/// Kinds of structured events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateChange,
    CircuitOpened,
    CircuitClosed,
    FailureRecorded,
    SuccessRecorded,
    HealthCheck,
    RecoveryAttempt,
    CascadeWarning,
    ServiceRecovered,
    AutoRecoveryAttempted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateChange => "state_change",
            Self::CircuitOpened => "circuit_opened",
            Self::CircuitClosed => "circuit_closed",
            Self::FailureRecorded => "failure_recorded",
            Self::SuccessRecorded => "success_recorded",
            Self::HealthCheck => "health_check",
            Self::RecoveryAttempt => "recovery_attempt",
            Self::CascadeWarning => "cascade_warning",
            Self::ServiceRecovered => "service_recovered",
            Self::AutoRecoveryAttempted => "auto_recovery_attempted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured event about one service's circuit
#[derive(Debug, Clone, Serialize)]
pub struct CircuitEvent {
    pub kind: EventKind,
    pub service: String,
    /// State before the event
    pub from: CircuitState,
    /// State after the event
    pub to: CircuitState,
    pub metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CircuitEvent {
    pub fn new(
        kind: EventKind,
        service: impl Into<String>,
        from: CircuitState,
        to: CircuitState,
        metrics: MetricsSnapshot,
    ) -> Self {
        Self {
            kind,
            service: service.into(),
            from,
            to,
            metrics,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether the event describes a state transition
    pub fn is_transition(&self) -> bool {
        self.from != self.to
    }
}
