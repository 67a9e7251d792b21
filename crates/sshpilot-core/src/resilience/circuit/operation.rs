//! Unit of work submitted to a circuit

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;

pub(crate) type Call<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, anyhow::Result<T>> + Send + 'a>;

/// An operation to run under circuit breaker protection
///
/// `run` is only invoked when the circuit admits the call. The breaker stops
/// waiting when the timeout elapses but cannot stop work already spawned
/// elsewhere, so `run` must be safe to abandon.
///
/// ```ignore
/// let op = Operation::new(|| async { session.exec("uptime").await })
///     .with_fallback(|| async { Ok(cached_uptime()) })
///     .with_timeout(Duration::from_secs(5));
/// let output = manager.execute_with_circuit_breaker("ssh-command", op).await?;
/// ```
pub struct Operation<'a, T> {
    run: Call<'a, T>,
    fallback: Option<Call<'a, T>>,
    timeout: Option<Duration>,
}

impl<'a, T: Send + 'a> Operation<'a, T> {
    /// Wrap the primary unit of work
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'a,
    {
        Self {
            run: Box::new(move || run().boxed()),
            fallback: None,
            timeout: None,
        }
    }

    /// Alternate result path used when the call is rejected or fails
    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'a,
    {
        self.fallback = Some(Box::new(move || fallback().boxed()));
        self
    }

    /// Override the circuit's call timeout for this call only
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<'a, T> Operation<'a, T> {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub(crate) fn into_parts(self) -> (Call<'a, T>, Option<Call<'a, T>>, Option<Duration>) {
        (self.run, self.fallback, self.timeout)
    }
}

impl<T> std::fmt::Debug for Operation<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("has_fallback", &self.fallback.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
