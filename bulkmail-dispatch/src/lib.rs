//! Batch dispatch engine for the bulkmail queue
//!
//! [`Dispatcher`] ties a queue store and send log to a [`MailTransport`]:
//! - Campaigns are expanded into one job per recipient
//! - Dispatch cycles claim tier-sized batches and send them sequentially
//! - Failed sends are retried on a fixed backoff table or marked failed
//! - A sweeper removes terminal jobs and old log entries

pub mod config;
mod error;
pub mod guard;
pub mod policy;
mod processor;
pub mod transport;
mod types;

pub use config::DispatchConfig;
pub use error::{DispatchError, TransportError};
pub use guard::ExecutionGuard;
pub use policy::{RateLimitPolicy, RetryDecision, RetryPolicy, TierLimits};
pub use processor::Dispatcher;
pub use transport::{
    IDEMPOTENCY_HEADER, LogTransport, MailTransport, OutboundEmail, SmtpConfig, SmtpTls,
    SmtpTransport, TransportConfig,
};
pub use types::{Campaign, DispatchSummary, Recipient, StopReason, SweepSummary};
