//! Error types for the bulkmail-queue crate.

use std::io;

use bulkmail_common::AddressError;
use thiserror::Error;

use crate::types::JobId;

/// Top-level store error type.
///
/// `Validation` is the only error caused by caller input. `StaleJob` and
/// `AttemptsExhausted` describe a transition that lost a race or broke a
/// job invariant. Everything else means the store itself is unusable.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Invalid job: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The job is not `processing` under the presented claim token
    #[error("Job {0} is not held by this claim")]
    StaleJob(JobId),

    #[error("Job {0} has no attempts remaining")]
    AttemptsExhausted(JobId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Errors a dispatch cycle can log and move past without aborting
    #[must_use]
    pub const fn is_job_level(&self) -> bool {
        matches!(
            self,
            Self::StaleJob(_) | Self::NotFound(_) | Self::AttemptsExhausted(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Corrupted record {0}: {1} trailing bytes")]
    Corrupted(String, usize),

    #[error("Send log record of {0} bytes is too large")]
    Oversized(usize),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid recipient: {0}")]
    Recipient(#[from] AddressError),

    #[error("max_attempts must be at least 1")]
    MaxAttempts,

    #[error("Invalid header {0:?}")]
    Header(String),

    #[error("Invalid store configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

impl From<tokio::task::JoinError> for QueueError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Store task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = QueueError::from(io_err);

        assert!(matches!(err, QueueError::Io(_)));
        assert!(err.to_string().contains("access denied"));
        assert!(!err.is_job_level());
    }

    #[test]
    fn test_validation_chain() {
        let err = QueueError::from(ValidationError::from(AddressError::Empty));
        assert!(matches!(
            err,
            QueueError::Validation(ValidationError::Recipient(AddressError::Empty))
        ));
        assert!(QueueError::StaleJob(JobId::generate()).is_job_level());
    }
}
