//! Bounded retry around a single check probe.
//!
//! The default policy makes exactly one attempt; plans opt into retries when
//! the storage or web layer needs time to converge after a deploy.

use crate::plan::RetrySpec;
use std::time::Duration;

/// Cap applied to each backoff delay when the plan sets none.
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound on total time spent sleeping between attempts.
    pub budget_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            budget_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_spec(spec: RetrySpec) -> Self {
        Self {
            attempts: spec.attempts.max(1),
            initial_delay_ms: spec.initial_delay_ms,
            max_delay_ms: spec.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS),
            budget_ms: spec.budget_ms,
        }
    }

    /// Delay before attempt `attempt + 1` (1-based `attempt`), doubling each time.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt count or sleep budget is exhausted. Returns the last result and
    /// the number of attempts made.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut() -> Result<T, E>,
        retryable: impl Fn(&E) -> bool,
    ) -> (Result<T, E>, u32) {
        let attempts = self.attempts.max(1);
        let mut slept_ms: u64 = 0;
        let mut attempt = 1;
        loop {
            let result = op();
            let err = match result {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => err,
            };
            if attempt >= attempts || !retryable(&err) {
                return (Err(err), attempt);
            }
            let delay = self.delay_after(attempt);
            let delay_ms = delay.as_millis() as u64;
            if let Some(budget) = self.budget_ms {
                if slept_ms.saturating_add(delay_ms) > budget {
                    tracing::debug!(attempt, budget_ms = budget, "retry budget exhausted");
                    return (Err(err), attempt);
                }
            }
            tracing::debug!(attempt, delay_ms, "retrying check");
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            slept_ms = slept_ms.saturating_add(delay_ms);
            attempt += 1;
        }
    }
}
