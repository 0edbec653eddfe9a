//! Mail transports
//!
//! A transport performs exactly one send per call and classifies any failure
//! as transient or permanent. Retry decisions are left to the processor.

mod log;
mod smtp;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bulkmail_queue::{JobId, QueueJob};
use serde::Deserialize;

pub use self::{
    log::LogTransport,
    smtp::{SmtpConfig, SmtpTls, SmtpTransport},
};
use crate::error::{DispatchError, TransportError};

/// Header carrying [`OutboundEmail::idempotency_key`]
pub const IDEMPOTENCY_HEADER: &str = "X-Bulkmail-Job";

/// A single message as handed to a [`MailTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail<'a> {
    pub job_id: JobId,
    pub recipient: &'a str,
    pub subject: &'a str,
    /// Fully rendered HTML body
    pub body: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    /// `{job_id}/{attempt}`. A job reclaimed after a crash is resent with the
    /// same key, so downstream systems can drop the duplicate.
    pub idempotency_key: String,
}

impl<'a> OutboundEmail<'a> {
    /// Build the outbound form of a claimed job for its next attempt
    #[must_use]
    pub fn from_job(job: &'a QueueJob) -> Self {
        Self {
            job_id: job.id,
            recipient: &job.recipient_email,
            subject: &job.subject,
            body: &job.message,
            headers: &job.headers,
            idempotency_key: format!("{}/{}", job.id, job.attempts + 1),
        }
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync + std::fmt::Debug {
    /// Send one message
    ///
    /// # Errors
    /// [`TransportError::Transient`] when a later attempt may succeed,
    /// [`TransportError::Permanent`] when it cannot
    async fn send(&self, email: &OutboundEmail<'_>) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: MailTransport + ?Sized> MailTransport for Arc<T> {
    async fn send(&self, email: &OutboundEmail<'_>) -> Result<(), TransportError> {
        (**self).send(email).await
    }
}

/// Which transport the daemon sends through
///
/// ```ron
/// transport: Smtp((
///     host: "smtp.example.com",
///     from: "Newsletter <news@example.com>",
/// )),
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub enum TransportConfig {
    Smtp(SmtpConfig),
    /// Log every message instead of sending it
    #[default]
    Log,
}

impl TransportConfig {
    /// Construct the configured transport
    ///
    /// # Errors
    /// Returns [`DispatchError::Configuration`] if the SMTP settings are unusable
    pub fn into_transport(self) -> Result<Arc<dyn MailTransport>, DispatchError> {
        Ok(match self {
            Self::Smtp(config) => Arc::new(SmtpTransport::new(config)?),
            Self::Log => Arc::new(LogTransport),
        })
    }
}
