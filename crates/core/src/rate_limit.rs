//! Upstream request limiter shared by every worker.

use std::fmt;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};

/// One permit per `1 / rps` seconds across all callers, no burst.
pub struct RateLimiter {
    inner: Option<DefaultDirectRateLimiter>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("unlimited", &self.is_unlimited())
            .finish()
    }
}

impl RateLimiter {
    /// `rps == 0.0` (or negative) disables limiting.
    pub fn per_second(rps: f64) -> Self {
        let quota = (rps > 0.0 && rps.is_finite())
            .then(|| Quota::with_period(Duration::from_secs_f64(1.0 / rps)))
            .flatten();
        Self {
            inner: quota.map(DefaultDirectRateLimiter::direct),
        }
    }

    pub fn unlimited() -> Self {
        Self { inner: None }
    }

    pub fn is_unlimited(&self) -> bool {
        self.inner.is_none()
    }

    /// Wait for the next free slot.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}
