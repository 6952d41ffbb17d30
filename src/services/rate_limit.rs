/// Token bucket rate limiter for notification channels
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::domain::ports::RateLimitSpec;

/// Token bucket rate limiter
///
/// Each channel kind gets one bucket, parameterized by the capacity and
/// refill rate the adapter advertises. Tokens are refilled continuously
/// based on elapsed time.
///
/// # Algorithm
/// - Capacity: Maximum number of tokens (burst capacity)
/// - Refill rate: Tokens added per second
/// - On acquire: Wait until at least 1 token is available, then consume it
/// - Refill: Tokens = min(tokens + elapsed_seconds * refill_rate, capacity)
pub struct TokenBucketRateLimiter {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucketRateLimiter {
    /// Create a bucket with explicit capacity and sustained refill rate.
    pub fn new(capacity: f64, refill_per_second: f64) -> Self {
        assert!(capacity > 0.0, "capacity must be positive");
        assert!(refill_per_second > 0.0, "refill_per_second must be positive");

        Self {
            state: Mutex::new(BucketState {
                tokens: capacity, // Start with full capacity
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate: refill_per_second,
        }
    }

    /// Create a bucket from a channel adapter's advertised limits.
    pub fn from_spec(spec: RateLimitSpec) -> Self {
        Self::new(spec.capacity, spec.refill_per_second)
    }

    /// Acquire a token, waiting if necessary.
    ///
    /// Blocks until at least one token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait_duration = {
                let mut state = self.state.lock().await;

                // Refill tokens based on elapsed time
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                let new_tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);

                if new_tokens >= 1.0 {
                    state.tokens = new_tokens - 1.0;
                    state.last_refill = now;
                    return;
                }

                // How long until the next token is available
                let tokens_needed = 1.0 - new_tokens;
                Duration::from_secs_f64(tokens_needed / self.refill_rate)
            };

            // Lock released before sleeping
            sleep(wait_duration).await;
        }
    }

    /// Current number of available tokens (for testing/monitoring).
    pub async fn available_tokens(&self) -> f64 {
        let state = self.state.lock().await;
        let elapsed = Instant::now()
            .duration_since(state.last_refill)
            .as_secs_f64();
        (state.tokens + elapsed * self.refill_rate).min(self.capacity)
    }
}
