use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How failed queue items are rescheduled.
///
/// Delay after the n-th failure is `base_delay * 2^(n-1)`, capped at
/// `max_delay`, plus up to `jitter` (a fraction) of random extra delay.
/// After `max_retries` failures the item is dead-lettered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60 * 60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, for deterministic schedules.
    pub fn fixed(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Delay before the next attempt, without jitter.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn next_attempt_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut delay = self.backoff(retry_count);
        if self.jitter > 0.0 {
            let extra = rand::rng().random_range(0.0..=self.jitter);
            delay = delay.mul_f64(1.0 + extra);
        }
        let delay =
            chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(52));
        now.checked_add_signed(delay).unwrap_or(now)
    }
}
