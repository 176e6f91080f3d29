//! Input validation for provisioning requests.
//!
//! These checks run at the transport edge before a request reaches the
//! lifecycle service.

use std::sync::LazyLock;

use regex::Regex;

/// `0x` followed by exactly 40 hex characters.
static FEE_RECIPIENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^0x[a-fA-F0-9]{40}$").expect("fee recipient regex is valid"));

/// Reasons a provisioning request is rejected before submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("num_validators must be positive")]
    InvalidKeyCount,
    #[error("num_validators must not exceed {max}")]
    KeyCountTooLarge { max: u32 },
    #[error("Invalid Ethereum address")]
    InvalidFeeRecipient,
}

/// Returns `true` if `address` is `0x` followed by 40 hex characters.
#[must_use]
pub fn is_valid_fee_recipient(address: &str) -> bool {
    FEE_RECIPIENT_RE.is_match(address)
}

/// Validates a fee-recipient address.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidFeeRecipient`] if the address is malformed.
pub fn validate_fee_recipient(address: &str) -> Result<(), ValidationError> {
    if is_valid_fee_recipient(address) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFeeRecipient)
    }
}

/// Validates a requested key count and narrows it to `u32`.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidKeyCount`] for zero or negative counts and
/// [`ValidationError::KeyCountTooLarge`] when the count exceeds `max`.
pub fn validate_key_count(count: i64, max: u32) -> Result<u32, ValidationError> {
    if count <= 0 {
        return Err(ValidationError::InvalidKeyCount);
    }
    match u32::try_from(count) {
        Ok(n) if n <= max => Ok(n),
        _ => Err(ValidationError::KeyCountTooLarge { max }),
    }
}
