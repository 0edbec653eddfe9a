//! Typed error handling for dispatch operations.
//!
//! Transport failures are split into:
//! - Permanent failures (5xx SMTP codes, unusable addresses) - don't retry
//! - Transient failures (4xx SMTP codes, network trouble) - retry with backoff
//!
//! Neither ever aborts a dispatch cycle. Only [`DispatchError`] does.

use bulkmail_queue::QueueError;
use thiserror::Error;

/// Failure reported by a mail transport for a single send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Worth retrying later
    #[error("Transient send failure: {0}")]
    Transient(String),

    /// Retrying cannot help
    #[error("Permanent send failure: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// The transport's reason, without the classification prefix
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Permanent(reason) => reason,
        }
    }
}

/// Errors that stop an operation as a whole
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The queue or send log could not be used
    #[error("Store error: {0}")]
    Store(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DispatchError {
    /// Returns `true` if the caller supplied invalid input
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Store(QueueError::Validation(_)))
    }
}

#[cfg(test)]
mod tests {
    use bulkmail_queue::ValidationError;

    use super::*;

    #[test]
    fn test_transport_error_classification() {
        let transient = TransportError::transient("421 try again later");
        assert!(!transient.is_permanent());
        assert_eq!(transient.reason(), "421 try again later");

        let permanent = TransportError::permanent("550 no such user");
        assert!(permanent.is_permanent());
        assert!(permanent.to_string().contains("550 no such user"));
    }

    #[test]
    fn test_validation_detection() {
        let err = DispatchError::from(QueueError::from(ValidationError::MaxAttempts));
        assert!(err.is_validation());

        let err = DispatchError::from(QueueError::Internal("boom".to_string()));
        assert!(!err.is_validation());
    }
}
