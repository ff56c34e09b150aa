//! Outbound delivery rate limiting
//!
//! A token bucket shared by every transport the controller hands out, so
//! all deliveries from this process observe one instance-wide send rate.

use crate::error::AppError;
use crate::metrics::RATE_LIMIT_WAIT_SECONDS;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket limiting deliveries per second.
pub struct DeliveryLimiter {
    state: Mutex<BucketState>,
    rate_per_sec: f64,
    burst: f64,
}

impl DeliveryLimiter {
    pub fn new(rate_per_sec: f64, burst: u32) -> Result<Self, AppError> {
        if rate_per_sec <= 0.0 {
            return Err(AppError::Validation(
                "rate_limit_per_sec must be positive".to_string(),
            ));
        }
        if burst == 0 {
            return Err(AppError::Validation(
                "rate_limit_burst must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
            rate_per_sec,
            burst: burst as f64,
        })
    }

    /// Wait until a token is available, then take it.
    ///
    /// The lock is never held across a sleep, so a cancelled waiter leaves
    /// the bucket untouched and other waiters unblocked. After each sleep
    /// the waiter re-checks the bucket rather than assuming its token is
    /// still there.
    pub async fn wait(&self) {
        let start = Instant::now();
        loop {
            let sleep_for = {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    RATE_LIMIT_WAIT_SECONDS.observe(start.elapsed().as_secs_f64());
                    return;
                }

                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate_per_sec)
            };
            tokio::time::sleep(sleep_for).await;
        }
    }
}
