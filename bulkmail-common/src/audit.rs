//! Audit logging for job lifecycle events
//!
//! This module emits structured audit events alongside the persisted send log,
//! so that operators tailing the process output see the same outcomes that
//! analytics later reads back.
//!
//! ## Audit Events
//!
//! - `SendSucceeded`: The transport accepted a job
//! - `SendRetried`: A job failed and was rescheduled
//! - `SendFailed`: A job failed permanently or exhausted its attempts
//! - `JobCancelled`: An operator cancelled a pending job
//!
//! ## PII Redaction
//!
//! Recipient addresses can be redacted through [`AuditConfig`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for job lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact the local part of recipient addresses
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: std::sync::OnceLock<Arc<AuditConfig>> = std::sync::OnceLock::new();

/// Initialize audit logging with configuration
///
/// Only the first call has any effect.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        if let Some((_, domain)) = email.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

pub fn log_send_succeeded(job_id: &str, recipient: &str, attempt: u32, campaign_type: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "SendSucceeded",
        job_id = %job_id,
        recipient = %recipient,
        send_attempt = attempt,
        campaign_type = %campaign_type,
        "Audit: Email sent"
    );
}

pub fn log_send_retried(
    job_id: &str,
    recipient: &str,
    attempt: u32,
    next_attempt_at: &str,
    error: &str,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "SendRetried",
        job_id = %job_id,
        recipient = %recipient,
        send_attempt = attempt,
        next_attempt_at = %next_attempt_at,
        error = %error,
        "Audit: Send failed, rescheduled"
    );
}

/// Logged once per job when it reaches `failed`.
///
/// `permanent` distinguishes a transport-reported permanent rejection from
/// exhausting the retry budget.
pub fn log_send_failed(job_id: &str, recipient: &str, attempts: u32, error: &str, permanent: bool) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::WARN,
        event = "SendFailed",
        job_id = %job_id,
        recipient = %recipient,
        attempts = attempts,
        permanent = permanent,
        error = %error,
        "Audit: Send failed"
    );
}

pub fn log_job_cancelled(job_id: &str) {
    if !config().enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "JobCancelled",
        job_id = %job_id,
        "Audit: Job cancelled"
    );
}
