use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{classify_error, GenerationError};
use crate::generation::{GenerationRequest, GenerationResponse, GenerationService};

/// Bounded retry with exponential backoff, applied only to retryable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempt is 1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy
/// runs out of attempts. Exhausting retries turns the last error into
/// [`GenerationError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GenerationError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !classify_error(&e).retryable => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!(label, attempts = attempt, "retries exhausted: {e}");
                return Err(GenerationError::RetriesExhausted {
                    attempts: attempt,
                    last: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!(label, attempt, delay_ms = delay.as_millis() as u64, "retryable generation error: {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Wraps any generation service with a [`RetryPolicy`].
pub struct RetryingGenerator {
    inner: Arc<dyn GenerationService>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn GenerationService>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl GenerationService for RetryingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        with_retry(self.policy, &request.label, || self.inner.generate(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(5), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_rate_limit_retried_once_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = with_retry(fast(), "t", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(GenerationError::RateLimited("429".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(out.ok(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = with_retry(fast(), "t", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerationError::Empty) }
        })
        .await;
        assert!(matches!(out, Err(GenerationError::Empty)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_rate_limit_escalates() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = with_retry(fast(), "t", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerationError::RateLimited("quota exceeded".into())) }
        })
        .await;
        assert!(matches!(out, Err(GenerationError::RetriesExhausted { attempts: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
