//! Domain error types.

use thiserror::Error;

/// Errors raised by the pure business rules.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input violates a business rule or has an illegal shape.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity is missing.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
