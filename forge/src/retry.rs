//! Bounded retry with exponential backoff for generation-backend calls.
//!
//! Only failures carrying a [`TransientProviderError`] are retried. Everything
//! else fails fast. This is the only place in the crate that sleeps.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, TransientProviderError};

/// Attempt cap and backoff base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// True if `err` should be retried.
///
/// A [`PipelineError`] anywhere in the error means an inner wrapper already
/// gave up, so the failure is terminal even if a transient cause sits below it.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<PipelineError>().is_some() {
        return false;
    }
    err.downcast_ref::<TransientProviderError>().is_some()
        || err
            .chain()
            .any(|cause| cause.is::<TransientProviderError>())
}

/// Run `op` until it succeeds, fails non-transiently, or the policy runs out.
///
/// Each call to `op` starts from scratch; results of failed attempts are
/// dropped.
pub fn with_retry<T, F>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        debug!(operation, attempt, max_attempts, "attempt");
        let err = match op() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_transient(&err) {
            return Err(err).context(PipelineError::NonRetryable {
                operation: operation.to_string(),
            });
        }
        if attempt >= max_attempts {
            warn!(operation, attempts = attempt, err = %err, "retries exhausted");
            return Err(err).context(PipelineError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
            });
        }

        let delay = policy.backoff_delay(attempt);
        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            err = %err,
            "transient failure, backing off"
        );
        thread::sleep(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
        }
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn always_transient_is_attempted_exactly_three_times() {
        let calls = Cell::new(0);
        let err = with_retry(&instant(), "generate", || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(TransientProviderError::new("503 overloaded").into())
        })
        .unwrap_err();

        assert_eq!(calls.get(), 3);
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::RetriesExhausted {
                operation: "generate".to_string(),
                attempts: 3
            })
        );
        assert!(format!("{err:#}").contains("503 overloaded"));
    }

    #[test]
    fn non_transient_is_attempted_once() {
        let calls = Cell::new(0);
        let err = with_retry(&instant(), "generate", || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(anyhow!("invalid api key"))
        })
        .unwrap_err();

        assert_eq!(calls.get(), 1);
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NonRetryable { .. })
        ));
    }

    #[test]
    fn recovers_after_transient_failures() {
        let calls = Cell::new(0);
        let value = with_retry(&instant(), "generate", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                return Err(anyhow::Error::new(TransientProviderError::new("429")))
                    .context("call backend");
            }
            Ok("text")
        })
        .expect("third attempt succeeds");
        assert_eq!(value, "text");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_errors_are_not_retried_by_an_outer_wrapper() {
        let inner = with_retry(&instant(), "inner", || -> Result<()> {
            Err(TransientProviderError::new("503").into())
        })
        .unwrap_err();
        assert!(!is_transient(&inner));

        let outer_calls = Cell::new(0);
        let mut inner = Some(inner);
        let _ = with_retry(&instant(), "outer", || -> Result<()> {
            outer_calls.set(outer_calls.get() + 1);
            Err(inner.take().unwrap_or_else(|| anyhow!("unexpected second call")))
        });
        assert_eq!(outer_calls.get(), 1);
    }
}
