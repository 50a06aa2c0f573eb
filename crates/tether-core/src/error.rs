//! Errors raised while validating domain values.

use thiserror::Error;

/// Why a domain value was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The text was not the expected JSON shape
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },

    /// A permission request is missing its id
    #[error("permission request has an empty id")]
    EmptyRequestId,
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
