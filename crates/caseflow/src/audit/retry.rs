//! Retry policy for audit delivery.

use std::time::Duration;

use time::OffsetDateTime;

/// Exponential backoff configuration for failed audit deliveries.
///
/// When a sink rejects a record, the emitter re-queues it and retries
/// according to this policy. After `max_attempts` failures the record is
/// moved to the dead letter list.
///
/// The delay before attempt N+1 is `min(base_delay * 2^(N-1), max_delay)`.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use caseflow::audit::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 5);
///
/// let strict = RetryPolicy {
///     max_attempts: 10,
///     base_delay: Duration::from_millis(500),
///     max_delay: Duration::from_secs(60),
/// };
/// assert!(strict.should_retry(9));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff. Doubles with each retry.
    pub base_delay: Duration,

    /// Cap on the backoff growth.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// When the next attempt should run, given that `attempt` (1-based) just
    /// failed.
    pub fn next_attempt_at(&self, attempt: u32) -> OffsetDateTime {
        let delay = self.backoff_duration(attempt);
        OffsetDateTime::now_utc()
            + time::Duration::new(delay.as_secs() as i64, delay.subsec_nanos() as i32)
    }

    /// The backoff delay after `attempt` (1-based) failed.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
