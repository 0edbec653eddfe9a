use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::DispatchError,
    policy::{RateLimitPolicy, RetryPolicy},
};

/// Batches claimed per dispatch cycle at most
pub const MAX_QUEUE_PROCESSING_ITERATIONS: usize = 20;
/// Pause between consecutive sends within a batch
pub const SEND_DELAY_MS: u64 = 100;
/// Soft deadline for one dispatch cycle
pub const MAX_EXECUTION_SECS: u64 = 600;
/// A send still running after this long is abandoned as a transient failure
pub const SEND_TIMEOUT_SECS: u64 = 60;
/// A job left in `processing` this long is assumed orphaned by a crash
pub const STALE_PROCESSING_SECS: u64 = 900;
pub const QUEUE_CLEANUP_DAYS: u32 = 30;
pub const SEND_LOG_RETENTION_DAYS: u32 = 90;

/// Dispatch tuning
///
/// ```ron
/// dispatch: (
///     dispatch_interval_secs: 60,
///     rate_limits: (
///         pro: (batch_size: 500, daily_cap: Some(50000)),
///     ),
///     retry: (
///         delays_minutes: [5, 15, 30],
///     ),
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How often the daemon runs a dispatch cycle
    #[serde(default = "defaults::dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,

    /// How often the daemon runs the cleanup sweeper
    #[serde(default = "defaults::sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "defaults::max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "defaults::send_delay_ms")]
    pub send_delay_ms: u64,

    /// Checked between sends; once spent, the rest of the batch is handed
    /// back to `pending`
    #[serde(default = "defaults::max_execution_secs")]
    pub max_execution_secs: u64,

    #[serde(default = "defaults::send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Must exceed the longest a cycle can hold a claim: the execution budget
    /// plus one send and its delay
    #[serde(default = "defaults::stale_timeout_secs")]
    pub stale_timeout_secs: u64,

    /// Terminal jobs older than this are deleted by the sweeper
    #[serde(default = "defaults::queue_retention_days")]
    pub queue_retention_days: u32,

    /// Send log entries older than this are deleted by the sweeper
    #[serde(default = "defaults::log_retention_days")]
    pub log_retention_days: u32,

    #[serde(default)]
    pub rate_limits: RateLimitPolicy,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_secs: defaults::dispatch_interval_secs(),
            sweep_interval_secs: defaults::sweep_interval_secs(),
            max_iterations: defaults::max_iterations(),
            send_delay_ms: defaults::send_delay_ms(),
            max_execution_secs: defaults::max_execution_secs(),
            send_timeout_secs: defaults::send_timeout_secs(),
            stale_timeout_secs: defaults::stale_timeout_secs(),
            queue_retention_days: defaults::queue_retention_days(),
            log_retention_days: defaults::log_retention_days(),
            rate_limits: RateLimitPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub const fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    #[must_use]
    pub const fn max_execution(&self) -> Duration {
        Duration::from_secs(self.max_execution_secs)
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Reject settings under which a running cycle could have its own claims
    /// reclaimed, and so sent twice, by the next one
    ///
    /// # Errors
    /// `DispatchError::Configuration` describing the first problem found
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.send_timeout_secs == 0 {
            return Err(DispatchError::Configuration(
                "send_timeout_secs must be at least 1".to_string(),
            ));
        }

        let longest_claim = self
            .max_execution()
            .saturating_add(self.send_timeout())
            .saturating_add(self.send_delay());
        let stale_timeout = Duration::from_secs(self.stale_timeout_secs);

        if stale_timeout <= longest_claim {
            return Err(DispatchError::Configuration(format!(
                "stale_timeout_secs ({}) must exceed max_execution_secs + send_timeout_secs + \
                 send_delay_ms ({longest_claim:?})",
                self.stale_timeout_secs
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn stale_timeout(&self) -> chrono::Duration {
        i64::try_from(self.stale_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    #[must_use]
    pub fn queue_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.queue_retention_days))
    }

    #[must_use]
    pub fn log_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.log_retention_days))
    }
}

mod defaults {
    pub const fn dispatch_interval_secs() -> u64 {
        60
    }

    pub const fn sweep_interval_secs() -> u64 {
        3600
    }

    pub const fn max_iterations() -> usize {
        super::MAX_QUEUE_PROCESSING_ITERATIONS
    }

    pub const fn send_delay_ms() -> u64 {
        super::SEND_DELAY_MS
    }

    pub const fn max_execution_secs() -> u64 {
        super::MAX_EXECUTION_SECS
    }

    pub const fn send_timeout_secs() -> u64 {
        super::SEND_TIMEOUT_SECS
    }

    pub const fn stale_timeout_secs() -> u64 {
        super::STALE_PROCESSING_SECS
    }

    pub const fn queue_retention_days() -> u32 {
        super::QUEUE_CLEANUP_DAYS
    }

    pub const fn log_retention_days() -> u32 {
        super::SEND_LOG_RETENTION_DAYS
    }
}
