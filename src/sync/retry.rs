//! Retry policy for external service calls
//!
//! The clients never retry; the orchestrator wraps every external call in
//! [`with_retry`] so backoff behavior is uniform across services and
//! testable on its own. Retryable failures get exponential backoff with
//! jitter, capped at a small fixed attempt count; fatal failures propagate
//! immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::types::Result;

/// Bounded exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (so 3 means up to 2 retries).
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt: doubling delay capped at
    /// `max_delay_ms`, plus up to 50% random jitter so a batch of users
    /// does not hammer a recovering service in lockstep.
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
            .min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis(exp + jitter)
    }
}

/// Run `operation` until it succeeds, fails fatally, or exhausts the
/// policy's attempt budget.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CadenceError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CadenceError::Transport("connection reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failures_propagate_without_retry() {
        let calls = AtomicU32::new(0);

        let result: Result<u32> = with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CadenceError::Remote("task not found".into())) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), CadenceError::Remote(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_bounded() {
        let calls = AtomicU32::new(0);

        let result: Result<u32> = with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CadenceError::Protocol {
                    status: 503,
                    message: "unavailable".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 500,
        };
        // Even at a late attempt the pre-jitter delay caps at max; jitter
        // adds at most half of that again.
        let delay = policy.delay(9);
        assert!(delay.as_millis() <= 750);
    }
}
