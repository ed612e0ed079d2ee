//! Error types for identifier parsing and name validation.

use thiserror::Error;

/// Errors that can occur when parsing identifiers or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The input is not a valid unsigned decimal number.
    #[error("invalid {kind}: '{actual}' is not an unsigned integer")]
    InvalidNumber { kind: &'static str, actual: String },

    /// A name violates the naming policy.
    #[error("invalid name '{name}': {message}")]
    InvalidName { name: String, message: &'static str },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }

    /// Returns true if this error is a naming policy violation.
    pub fn is_name_error(&self) -> bool {
        matches!(self, IdError::InvalidName { .. })
    }
}
