use std::time::Duration;

use async_trait::async_trait;
use bulkmail_common::outbound;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{
        Mailbox,
        header::{ContentType, HeaderName, HeaderValue},
    },
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use serde::Deserialize;

use super::{IDEMPOTENCY_HEADER, MailTransport, OutboundEmail};
use crate::error::{DispatchError, TransportError};

/// Headers the transport sets itself; user supplied values are ignored
const MANAGED_HEADERS: [&str; 6] = [
    "from",
    "to",
    "subject",
    "content-type",
    "reply-to",
    "x-bulkmail-job",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SmtpTls {
    /// TLS from the first byte, usually port 465
    Implicit,
    #[default]
    StartTls,
    /// Plain text; only for local relays
    None,
}

/// Relay used to hand messages to the outside world
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default)]
    pub tls: SmtpTls,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Sender mailbox, e.g. `Newsletter <news@example.com>`
    pub from: String,

    #[serde(default)]
    pub reply_to: Option<String>,

    /// Applies to each SMTP command
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

mod defaults {
    pub const fn port() -> u16 {
        587
    }

    pub const fn timeout_secs() -> u64 {
        30
    }
}

/// Sends through an SMTP relay with lettre's pooled async client
#[derive(Debug)]
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    reply_to: Option<Mailbox>,
}

impl SmtpTransport {
    /// Build a transport from its configuration
    ///
    /// # Errors
    /// Returns a configuration error if a mailbox does not parse or the TLS
    /// parameters cannot be built
    pub fn new(config: SmtpConfig) -> Result<Self, DispatchError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| DispatchError::Configuration(format!("Invalid from address: {e}")))?;
        let reply_to = config
            .reply_to
            .as_deref()
            .map(str::parse::<Mailbox>)
            .transpose()
            .map_err(|e| DispatchError::Configuration(format!("Invalid reply-to address: {e}")))?;

        let tls = match config.tls {
            SmtpTls::None => Tls::None,
            SmtpTls::Implicit => Tls::Wrapper(tls_parameters(&config.host)?),
            SmtpTls::StartTls => Tls::Required(tls_parameters(&config.host)?),
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(tls)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
            reply_to,
        })
    }

    fn message(&self, email: &OutboundEmail<'_>) -> Result<Message, TransportError> {
        let to = email
            .recipient
            .parse::<Mailbox>()
            .map_err(|e| TransportError::permanent(format!("Invalid recipient: {e}")))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_HTML)
            .raw_header(header(IDEMPOTENCY_HEADER, &email.idempotency_key)?);

        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        for (name, value) in email.headers {
            if MANAGED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            builder = builder.raw_header(header(name, value)?);
        }

        builder
            .body(email.body.to_string())
            .map_err(|e| TransportError::permanent(format!("Unable to build message: {e}")))
    }
}

fn tls_parameters(host: &str) -> Result<TlsParameters, DispatchError> {
    TlsParameters::new(host.to_string())
        .map_err(|e| DispatchError::Configuration(format!("Invalid TLS parameters: {e}")))
}

fn header(name: &str, value: &str) -> Result<HeaderValue, TransportError> {
    let name = HeaderName::new_from_ascii(name.to_string())
        .map_err(|e| TransportError::permanent(format!("Invalid header name {name}: {e}")))?;
    Ok(HeaderValue::new(name, value.to_string()))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, email: &OutboundEmail<'_>) -> Result<(), TransportError> {
        let message = self.message(email)?;

        outbound!(
            level = DEBUG,
            "Sending {} to {} via SMTP",
            email.idempotency_key,
            email.recipient
        );

        match self.mailer.send(message).await {
            Ok(response) => {
                outbound!(
                    level = TRACE,
                    "Relay accepted {} with {}",
                    email.idempotency_key,
                    response.code()
                );
                Ok(())
            }
            Err(e) if e.is_permanent() => Err(TransportError::permanent(e.to_string())),
            Err(e) => Err(TransportError::transient(e.to_string())),
        }
    }
}
