//! Recipient address validation.
//!
//! Jobs are only ever created for a single, bare mailbox. Display names,
//! groups and lists are rejected so that the transport never has to guess
//! which address a job belongs to.

use mailparse::MailAddr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Recipient address is empty")]
    Empty,

    #[error("Recipient address could not be parsed: {0}")]
    Unparseable(String),

    #[error("Expected exactly one mailbox, found {0}")]
    NotSingle(usize),

    #[error("Recipient address {0} is missing a local part or domain")]
    Incomplete(String),
}

/// Validate a recipient address, returning it trimmed with the domain
/// lowercased.
///
/// # Errors
///
/// Returns an [`AddressError`] describing why the input is not a single,
/// complete mailbox.
pub fn validate_recipient(input: &str) -> Result<String, AddressError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }

    let parsed =
        mailparse::addrparse(trimmed).map_err(|e| AddressError::Unparseable(e.to_string()))?;

    let addr = match parsed.as_slice() {
        [MailAddr::Single(info)] if info.display_name.is_none() => info.addr.clone(),
        [MailAddr::Single(_)] => return Err(AddressError::Unparseable(trimmed.to_string())),
        [MailAddr::Group(group)] => return Err(AddressError::NotSingle(group.addrs.len())),
        other => return Err(AddressError::NotSingle(other.len())),
    };

    let Some((local, domain)) = addr.rsplit_once('@') else {
        return Err(AddressError::Incomplete(addr));
    };

    if local.is_empty()
        || domain.is_empty()
        || domain.starts_with('.')
        || domain.ends_with('.')
        || !domain.contains('.')
        || addr.chars().any(char::is_whitespace)
    {
        return Err(AddressError::Incomplete(addr));
    }

    Ok(format!("{local}@{}", domain.to_ascii_lowercase()))
}
