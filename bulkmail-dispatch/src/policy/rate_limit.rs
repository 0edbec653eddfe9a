//! Per-tier send limits.
//!
//! Throughput is bounded by claiming at most `batch_size` jobs per batch and
//! a fixed number of batches per cycle. A tier may also carry a daily cap,
//! counted over the current UTC day.

use bulkmail_common::Tier;
use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Jobs claimed per batch
    pub batch_size: usize,

    /// Maximum successful sends per UTC day; `None` means unlimited
    #[serde(default)]
    pub daily_cap: Option<usize>,
}

impl TierLimits {
    #[must_use]
    pub const fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            daily_cap: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default = "defaults::free")]
    pub free: TierLimits,

    #[serde(default = "defaults::starter")]
    pub starter: TierLimits,

    #[serde(default = "defaults::pro")]
    pub pro: TierLimits,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            free: defaults::free(),
            starter: defaults::starter(),
            pro: defaults::pro(),
        }
    }
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Free => self.free,
            Tier::Starter => self.starter,
            Tier::Pro => self.pro,
        }
    }

    #[must_use]
    pub const fn batch_size(&self, tier: Tier) -> usize {
        self.limits(tier).batch_size
    }

    /// How many jobs the next batch may claim, given `sent_today` successful
    /// sends so far. `None` once the daily cap is used up.
    #[must_use]
    pub fn next_batch_limit(&self, tier: Tier, sent_today: usize) -> Option<usize> {
        let limits = self.limits(tier);
        match limits.daily_cap {
            None => Some(limits.batch_size),
            Some(cap) => match cap.saturating_sub(sent_today) {
                0 => None,
                remaining => Some(remaining.min(limits.batch_size)),
            },
        }
    }

    #[must_use]
    pub const fn has_daily_cap(&self, tier: Tier) -> bool {
        self.limits(tier).daily_cap.is_some()
    }
}

/// Start and end of the UTC day containing `now`
#[must_use]
pub fn utc_day(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = now.date_naive();
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let end = date
        .checked_add_days(Days::new(1))
        .map_or(DateTime::<Utc>::MAX_UTC, |next| {
            next.and_time(NaiveTime::MIN).and_utc()
        });
    (start, end)
}

mod defaults {
    use super::TierLimits;

    pub const fn free() -> TierLimits {
        TierLimits::new(50)
    }

    pub const fn starter() -> TierLimits {
        TierLimits::new(100)
    }

    pub const fn pro() -> TierLimits {
        TierLimits::new(500)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_batch_size_by_tier() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.batch_size(Tier::Free), 50);
        assert_eq!(policy.batch_size(Tier::Starter), 100);
        assert_eq!(policy.batch_size(Tier::Pro), 500);
    }

    #[test]
    fn test_uncapped_tier_always_gets_full_batch() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.next_batch_limit(Tier::Free, 1_000_000), Some(50));
        assert!(!policy.has_daily_cap(Tier::Free));
    }

    #[test]
    fn test_daily_cap_shrinks_batch() {
        let policy = RateLimitPolicy {
            free: TierLimits {
                batch_size: 50,
                daily_cap: Some(120),
            },
            ..RateLimitPolicy::default()
        };

        assert_eq!(policy.next_batch_limit(Tier::Free, 0), Some(50));
        assert_eq!(policy.next_batch_limit(Tier::Free, 100), Some(20));
        assert_eq!(policy.next_batch_limit(Tier::Free, 120), None);
        assert_eq!(policy.next_batch_limit(Tier::Free, 500), None);

        // Other tiers keep their own limits
        assert_eq!(policy.next_batch_limit(Tier::Pro, 500), Some(500));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let policy: RateLimitPolicy =
            ron::from_str("(pro: (batch_size: 250, daily_cap: Some(10000)))").expect("Valid");

        assert_eq!(policy.batch_size(Tier::Free), 50);
        assert_eq!(policy.batch_size(Tier::Pro), 250);
        assert_eq!(policy.limits(Tier::Pro).daily_cap, Some(10_000));
    }

    #[test]
    fn test_utc_day_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 59).unwrap();
        let (start, end) = utc_day(now);

        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
    }
}
