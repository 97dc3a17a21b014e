//! Typed errors surfaced by the public API.
//!
//! Only user-level conditions live here. Capacity conditions (a page with no
//! room left) are ordinary return values consumed by the split and adoption
//! machinery and never escape the crate; invariant violations are assertions
//! and abort.

use thiserror::Error;

/// Errors surfaced by tree operations.
///
/// Keys are reported in their `Debug` rendering so the error type stays
/// object-safe and independent of the key type parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Non-upsert insertion of a key that is already present.
    #[error("key already exists: {0}")]
    DuplicateKey(String),

    /// Strict removal of a key that is not present.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Attempt to install a non-empty page as a foster child.
    #[error("foster child must be empty: {0}")]
    InvalidFosterChild(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_offending_key() {
        let err = Error::DuplicateKey(format!("{:?}", "apple"));
        assert_eq!(err.to_string(), "key already exists: \"apple\"");

        let err = Error::KeyNotFound(format!("{:?}", 42u64));
        assert_eq!(err.to_string(), "key not found: 42");
    }
}
