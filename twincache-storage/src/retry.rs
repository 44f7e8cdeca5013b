//! Deadline-bounded retry loop.
//!
//! Lock and merge loops restart on every etag conflict and have no iteration
//! cap of their own. [`retry_until`] runs them against an absolute
//! [`Deadline`] instead, so contention can delay a caller but never hang it.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use twincache_core::{TwinCacheError, TwinCacheResult};

/// Absolute point in time after which a loop gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never passes.
    pub fn never() -> Self {
        Self(None)
    }

    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` for an unbounded deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Run `future`, failing with `DeadlineExceeded` if the deadline passes first.
    pub async fn run<T, F>(&self, operation: &str, future: F) -> TwinCacheResult<T>
    where
        F: Future<Output = TwinCacheResult<T>>,
    {
        match self.0 {
            None => future.await,
            Some(at) => tokio::time::timeout_at(at, future)
                .await
                .map_err(|_| TwinCacheError::deadline_exceeded(operation))?,
        }
    }

    /// Sleep for `delay`, failing early if the deadline would pass first.
    pub async fn sleep(&self, operation: &str, delay: Duration) -> TwinCacheResult<()> {
        if let Some(at) = self.0 {
            if Instant::now() + delay > at {
                return Err(TwinCacheError::deadline_exceeded(operation));
            }
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::never()
    }
}

/// What one pass of a retry loop decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Finished with a result.
    Done(T),
    /// Lost a race; start again from fresh state.
    Retry,
}

/// Run `attempt` until it reports [`Attempt::Done`] or `deadline` passes.
///
/// `attempt` receives the zero-based attempt number. Errors returned by an
/// attempt propagate immediately. The deadline is checked between attempts;
/// an attempt in flight is never cancelled, so one holding a lock can still
/// release it. Slow steps inside an attempt should go through
/// [`Deadline::run`].
pub async fn retry_until<T, F, Fut>(
    operation: &str,
    deadline: Deadline,
    mut attempt: F,
) -> TwinCacheResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TwinCacheResult<Attempt<T>>>,
{
    let mut number: u32 = 0;
    loop {
        if deadline.is_expired() {
            tracing::warn!(operation, attempts = number, "Deadline exceeded");
            return Err(TwinCacheError::deadline_exceeded(operation));
        }

        match attempt(number).await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry => {
                tracing::debug!(operation, attempt = number, "Retrying after conflict");
                number = number.saturating_add(1);
                tokio::task::yield_now().await;
            }
        }
    }
}

/// Fixed-delay backoff with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl FixedBackoff {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether another attempt is allowed after `failures` failed ones.
    pub fn allows(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}
