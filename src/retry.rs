//! Bounded retry with exponential backoff for outbound calls.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// What to do with a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the policy's backoff delay.
    Retry,
    /// Retry after a server-supplied delay.
    RetryAfter(Duration),
    /// Give up immediately.
    Stop,
}

#[derive(Error, Debug)]
pub enum RetryError<E: fmt::Display + fmt::Debug> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("{0}")]
    Permanent(E),
}

impl<E: fmt::Display + fmt::Debug> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Permanent(_) => 1,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Permanent(err) => err,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before attempt `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    fn next_delay(&self, attempt: u32, decision: RetryDecision) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        match decision {
            RetryDecision::Retry => Some(self.delay_for(attempt)),
            RetryDecision::RetryAfter(delay) => Some(delay),
            RetryDecision::Stop => None,
        }
    }

    /// Runs `op` on the current thread, sleeping between attempts.
    pub fn run<T, E, F, C>(&self, label: &str, mut op: F, classify: C) -> Result<T, RetryError<E>>
    where
        E: fmt::Display + fmt::Debug,
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> RetryDecision,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let decision = classify(&err);
            if decision == RetryDecision::Stop {
                return Err(RetryError::Permanent(err));
            }
            let Some(delay) = self.next_delay(attempt, decision) else {
                tracing::warn!(label, attempts = attempt, error = %err, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            };
            tracing::warn!(
                label,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    /// Async counterpart of [`RetryPolicy::run`].
    pub async fn run_async<T, E, F, Fut, C>(
        &self,
        label: &str,
        mut op: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display + fmt::Debug,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let decision = classify(&err);
            if decision == RetryDecision::Stop {
                return Err(RetryError::Permanent(err));
            }
            let Some(delay) = self.next_delay(attempt, decision) else {
                tracing::warn!(label, attempts = attempt, error = %err, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            };
            tracing::warn!(
                label,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}
