/// Retry policy with exponential backoff for transient failures
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::domain::errors::DomainError;
use crate::domain::models::config::RetryConfig;

/// Retry policy with exponential backoff
///
/// Backoff doubles with each retry, capped at `max_backoff_ms`. Only
/// transient errors (store unavailable, channel transient) are retried;
/// permanent failures propagate immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries before giving up
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Execute an async operation, retrying transient `DomainError`s with
    /// exponential backoff.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_transient() || attempt >= self.max_retries {
                        return Err(err);
                    }

                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying after backoff"
                    );

                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff duration for a given attempt: initial * 2^attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);

        Duration::from_millis(backoff_ms)
    }

    /// Backoff with deterministic jitter in `[75%, 125%]` of the base,
    /// seeded so the same (job, attempt) pair always lands on the same
    /// delay. Spreads retry bursts without a PRNG dependency.
    pub fn backoff_with_jitter(&self, attempt: u32, seed: u64) -> Duration {
        let base = self.backoff(attempt).as_millis() as u64;
        // splitmix64 finalizer over the seed and attempt
        let mut x = seed ^ (u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        x ^= x >> 31;
        let jitter = x % (base / 2 + 1); // 0..=base/2
        Duration::from_millis(base * 3 / 4 + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 500, 4_000);

        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4_000)); // Capped
        assert_eq!(policy.backoff(10), Duration::from_millis(4_000)); // Still capped
    }

    #[test]
    fn test_jitter_is_deterministic_and_bounded() {
        let policy = RetryPolicy::new(3, 1_000, 60_000);

        let a = policy.backoff_with_jitter(1, 42);
        let b = policy.backoff_with_jitter(1, 42);
        assert_eq!(a, b, "same seed and attempt must jitter identically");

        let base = policy.backoff(1).as_millis();
        assert!(a.as_millis() >= base * 3 / 4);
        assert!(a.as_millis() <= base * 5 / 4);

        // Different seeds should usually land on different delays.
        let c = policy.backoff_with_jitter(1, 43);
        let d = policy.backoff_with_jitter(1, 44);
        assert!(a != c || a != d);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3, 10, 100);
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(DomainError::StoreUnavailable("connection reset".to_string()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new(3, 10, 100);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DomainError::ValidationFailed("bad input".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let policy = RetryPolicy::new(2, 10, 100);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DomainError::StoreUnavailable("down".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        // Initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
