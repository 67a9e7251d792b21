//! Error types for the resilience layer

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors surfaced by circuits and the resilience manager
///
/// Circuit-level variants (`CircuitOpen`, `Timeout`, `OperationFailed`,
/// `FallbackFailed`, `ShutDown`) describe runtime resilience events.
/// `UnknownService` and `InvalidConfig` are configuration errors and are
/// never worth retrying.
#[derive(Error, Debug)]
pub enum ResilienceError {
    /// The breaker rejected the call without attempting it
    #[error("Circuit '{service}' is open, retry after {retry_after:?}")]
    CircuitOpen {
        service: String,
        next_retry_at: DateTime<Utc>,
        retry_after: Duration,
    },

    /// The wrapped operation did not finish within its timeout
    #[error("Operation on '{service}' timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    /// The wrapped operation failed and no fallback was supplied
    #[error("Operation on '{service}' failed: {source}")]
    OperationFailed {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    /// Both the primary path and its fallback failed
    #[error("Operation on '{service}' failed ({primary}) and its fallback failed too: {fallback}")]
    FallbackFailed {
        service: String,
        primary: Box<ResilienceError>,
        fallback: anyhow::Error,
    },

    /// The circuit has been shut down and accepts no more calls
    #[error("Circuit '{service}' has been shut down")]
    ShutDown { service: String },

    /// A background task of the circuit ended abnormally
    #[error("Background task of circuit '{service}' failed: {message}")]
    TaskFailed { service: String, message: String },

    /// The caller referenced a service that was never registered
    #[error("Configuration error: unknown service '{service}'")]
    UnknownService { service: String },

    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// Create a new configuration validation error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a new unknown-service error
    pub fn unknown_service(service: impl Into<String>) -> Self {
        Self::UnknownService {
            service: service.into(),
        }
    }

    /// Whether this is a programming/deployment error rather than a runtime event
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::UnknownService { .. } | Self::InvalidConfig(_))
    }

    /// Whether the call is known to be safe to retry later.
    ///
    /// Only rejections are retryable by definition; for timeouts and
    /// operation failures it depends on the operation's own idempotency.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// How long to wait before the breaker admits a probe, if rejected
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            Self::FallbackFailed { primary, .. } => primary.retry_after(),
            _ => None,
        }
    }

    /// The service the error belongs to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::CircuitOpen { service, .. }
            | Self::Timeout { service, .. }
            | Self::OperationFailed { service, .. }
            | Self::FallbackFailed { service, .. }
            | Self::ShutDown { service }
            | Self::TaskFailed { service, .. }
            | Self::UnknownService { service } => Some(service),
            Self::InvalidConfig(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_distinct() {
        let unknown = ResilienceError::unknown_service("ssh-exec");
        assert!(unknown.is_configuration_error());
        assert!(!unknown.is_retryable());
        assert_eq!(unknown.service(), Some("ssh-exec"));

        let timeout = ResilienceError::Timeout {
            service: "ssh-exec".into(),
            timeout: Duration::from_millis(250),
        };
        assert!(!timeout.is_configuration_error());
        assert_eq!(timeout.retry_after(), None);
    }

    #[test]
    fn test_fallback_failure_keeps_both_causes() {
        let primary = ResilienceError::CircuitOpen {
            service: "file-transfer".into(),
            next_retry_at: Utc::now(),
            retry_after: Duration::from_secs(2),
        };
        let err = ResilienceError::FallbackFailed {
            service: "file-transfer".into(),
            primary: Box::new(primary),
            fallback: anyhow::anyhow!("cache miss"),
        };

        let message = err.to_string();
        assert!(message.contains("is open"));
        assert!(message.contains("cache miss"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }
}
