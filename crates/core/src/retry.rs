//! Bounded exponential backoff shared by page fetches, storage writes and
//! client reconnects.

use std::time::Duration;

/// `base * 2^(attempt - 1)`, capped at `max`. `attempt` is 1-based.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exp).unwrap_or(max).min(max)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt that follows failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, attempt)
    }

    /// Delay honouring a server-provided hint, never beyond `max_delay`.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_delay),
            None => self.delay_for(attempt),
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
