use crate::errors::{ErrorCode, HttpError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Longest client-supplied transaction ID accepted.
pub const MAX_TRANSACTION_ID_LEN: usize = 256;

/// Identifier of one in-flight transaction.
///
/// Clients may supply their own (any short visible-ASCII string); otherwise a
/// ULID is generated so IDs sort by creation time in logs.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Validate a client-supplied ID.
    ///
    /// # Errors
    ///
    /// `E_BAD_TRANSACTION_ID` when the value is empty, too long, or contains
    /// anything but visible ASCII.
    pub fn parse(value: &str) -> Result<Self, HttpError> {
        let valid = !value.is_empty()
            && value.len() <= MAX_TRANSACTION_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(HttpError::new(
                ErrorCode::BadTransactionId,
                format!(
                    "Transaction IDs must be 1 to {MAX_TRANSACTION_ID_LEN} visible ASCII characters"
                ),
            ))
        }
    }

    /// Use the header value when present, generate one otherwise.
    ///
    /// # Errors
    ///
    /// Propagates [`TransactionId::parse`] failures for supplied values.
    pub fn from_header_or_generate(header_value: Option<&str>) -> Result<Self, HttpError> {
        match header_value {
            Some(value) => Self::parse(value),
            None => Ok(Self::generate()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_ulids() {
        let id = TransactionId::generate();
        assert!(id.as_str().parse::<ulid::Ulid>().is_ok());
        assert_ne!(id, TransactionId::generate());
    }

    #[test]
    fn test_supplied_ids() {
        assert_eq!(TransactionId::parse("lol").unwrap().as_str(), "lol");
        assert!(TransactionId::parse("").is_err());
        assert!(TransactionId::parse("with space").is_err());
        let too_long = "x".repeat(MAX_TRANSACTION_ID_LEN + 1);
        let err = TransactionId::parse(&too_long).unwrap_err();
        assert!(err.is(ErrorCode::BadTransactionId));
    }

    #[test]
    fn test_from_header_or_generate() {
        let id = TransactionId::from_header_or_generate(Some("abc")).unwrap();
        assert_eq!(id.to_string(), "abc");
        assert!(TransactionId::from_header_or_generate(None).is_ok());
    }
}
