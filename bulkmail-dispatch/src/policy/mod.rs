//! Policy abstractions for dispatch.
//!
//! - [`RetryPolicy`]: whether a failed send is retried, and when
//! - [`RateLimitPolicy`]: how many jobs a batch may claim for a tier

pub mod rate_limit;
pub mod retry;

pub use rate_limit::{RateLimitPolicy, TierLimits};
pub use retry::{RetryDecision, RetryPolicy};
