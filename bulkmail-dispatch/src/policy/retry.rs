//! Retry policy for failed sends.
//!
//! Backoff follows a fixed table indexed by the number of attempts already
//! recorded on the job, falling back to a flat delay once the table runs out.

use bulkmail_queue::QueueJob;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// What to do with a job whose send just failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the job to `pending`, eligible again at this time
    Retry { at: DateTime<Utc> },
    /// Give up on the job
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before each retry, in minutes. Entry `n` is used when the job
    /// has already recorded `n` failed attempts.
    ///
    /// Default: `[5, 15, 30]`
    #[serde(default = "defaults::delays_minutes")]
    pub delays_minutes: Vec<u32>,

    /// Delay used once `delays_minutes` is exhausted
    ///
    /// Default: 30 minutes
    #[serde(default = "defaults::fallback_delay_minutes")]
    pub fallback_delay_minutes: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays_minutes: defaults::delays_minutes(),
            fallback_delay_minutes: defaults::fallback_delay_minutes(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A job is retried after a transient failure while it still has
    /// attempts left. Permanent failures are never retried.
    #[must_use]
    pub const fn should_retry(job: &QueueJob, error: &TransportError) -> bool {
        !error.is_permanent() && !job.attempts_exhausted()
    }

    /// Backoff for a job that has recorded `attempts` failures so far
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let minutes = usize::try_from(attempts)
            .ok()
            .and_then(|index| self.delays_minutes.get(index))
            .copied()
            .unwrap_or(self.fallback_delay_minutes);
        Duration::minutes(i64::from(minutes))
    }

    #[must_use]
    pub fn next_attempt_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay_for(attempts)
    }

    #[must_use]
    pub fn decide(&self, job: &QueueJob, error: &TransportError, now: DateTime<Utc>) -> RetryDecision {
        if Self::should_retry(job, error) {
            RetryDecision::Retry {
                at: self.next_attempt_at(job.attempts, now),
            }
        } else {
            RetryDecision::Fail
        }
    }
}

mod defaults {
    pub fn delays_minutes() -> Vec<u32> {
        vec![5, 15, 30]
    }

    pub const fn fallback_delay_minutes() -> u32 {
        30
    }
}
