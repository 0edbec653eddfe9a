//! Scripted mail transport for dispatch tests
//!
//! - Fails sends to chosen recipients, transiently or permanently
//! - Records every call
//! - Can take a fixed amount of (tokio) time per send

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bulkmail_dispatch::{MailTransport, OutboundEmail, TransportError};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub recipient: String,
    pub idempotency_key: String,
}

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    failures: HashMap<String, TransportError>,
    send_time: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `recipient` fails with `error`
    pub fn failing_for(mut self, recipient: &str, error: TransportError) -> Self {
        self.failures.insert(recipient.to_string(), error);
        self
    }

    /// Each send takes `duration` of tokio time
    pub fn taking(mut self, duration: Duration) -> Self {
        self.send_time = Some(duration);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, recipient: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.recipient == recipient)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, email: &OutboundEmail<'_>) -> Result<(), TransportError> {
        if let Some(duration) = self.send_time {
            tokio::time::sleep(duration).await;
        }

        self.calls.lock().push(Call {
            recipient: email.recipient.to_string(),
            idempotency_key: email.idempotency_key.clone(),
        });

        self.failures
            .get(email.recipient)
            .map_or(Ok(()), |error| Err(error.clone()))
    }
}
