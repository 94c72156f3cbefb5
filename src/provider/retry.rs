//! Retry with exponential backoff for provider calls.
//!
//! Only failures classified as retryable are retried. The delay doubles per
//! attempt and carries a small jitter so batch jobs do not synchronize their
//! retries against the same upstream.

use std::future::Future;
use std::time::Duration;

use rand::{Rng, thread_rng};
use tracing::{debug, warn};

use crate::provider::ProviderError;

/// Upper bound on a single backoff delay
const MAX_BACKOFF_MS: u64 = 30_000;

/// Retry policy for provider calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts, the initial call included
    pub max_attempts: u32,

    /// Base delay in milliseconds, doubled per attempt
    pub base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_ms,
        }
    }

    /// Delay before the given retry (1-based)
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_ms.saturating_mul(1 << (attempt - 1).min(16));
        let mut delay_ms = exp.min(MAX_BACKOFF_MS);
        if delay_ms > 10 {
            let jitter = thread_rng().gen_range(0.8..1.2);
            delay_ms = ((delay_ms as f64) * jitter) as u64;
        }
        Duration::from_millis(delay_ms)
    }
}

/// A provider call that failed even after retries
#[derive(Debug, thiserror::Error)]
#[error("{error} (after {attempts} attempts)")]
pub struct RetryFailure {
    /// The last error observed
    #[source]
    pub error: ProviderError,

    /// Number of attempts made
    pub attempts: u32,
}

impl From<RetryFailure> for ProviderError {
    fn from(failure: RetryFailure) -> Self {
        failure.error
    }
}

/// Run `op` until it succeeds, it fails permanently, or the policy's attempt
/// budget is exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempts < policy.max_attempts => {
                let delay = match &error {
                    ProviderError::RateLimited { retry_after_secs } => {
                        // Honor the provider's hint when it is longer than ours
                        policy
                            .delay_for(attempts)
                            .max(Duration::from_secs(*retry_after_secs))
                    }
                    _ => policy.delay_for(attempts),
                };
                debug!(
                    "provider call failed ({}), retrying in {:?} (attempt {}/{})",
                    error, delay, attempts, policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                if attempts > 1 {
                    warn!("provider call failed after {} attempts: {}", attempts, error);
                }
                return Err(RetryFailure { error, attempts });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(RetryPolicy::new(3, 1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ProviderError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(RetryPolicy::new(3, 1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Transient("flaky".to_string()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(RetryPolicy::new(3, 1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Permanent("broken".to_string())) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(RetryPolicy::new(3, 1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Transient("still flaky".to_string())) }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.error, ProviderError::Transient(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
