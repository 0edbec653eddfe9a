use async_trait::async_trait;
use bulkmail_common::outbound;

use super::{MailTransport, OutboundEmail};
use crate::error::TransportError;

/// Dry-run transport: every message is logged and reported as sent
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, email: &OutboundEmail<'_>) -> Result<(), TransportError> {
        outbound!(
            level = INFO,
            "[dry run] {} -> {}: {} ({} bytes, {} extra headers)",
            email.idempotency_key,
            email.recipient,
            email.subject,
            email.body.len(),
            email.headers.len()
        );
        Ok(())
    }
}
