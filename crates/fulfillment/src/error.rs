//! Fulfillment error taxonomy.

use thiserror::Error;

use db_core::{DbError, Retryable};
use domain::DomainError;

/// Errors that can occur during fulfillment operations.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Malformed input, an illegal state transition, a multi-warehouse
    /// allocation set, or an under-allocated order.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced order, allocation, fulfillment, or stock row is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A computed output was empty where at least one result was required.
    #[error("business rule violation: {0}")]
    Business(String),

    /// A database error, surfaced after the primitive layer exhausted its
    /// retries.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<DomainError> for FulfillmentError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(message) => FulfillmentError::Validation(message),
            DomainError::NotFound(message) => FulfillmentError::NotFound(message),
        }
    }
}

impl From<DbError> for FulfillmentError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::RowsNotFound { table, requested, found } => FulfillmentError::NotFound(
                format!("{table}: requested {requested} rows to lock, found {found}"),
            ),
            DbError::KeyArity { .. } | DbError::MalformedBulkInput { .. } => {
                FulfillmentError::Validation(e.to_string())
            }
            DbError::Database(inner) => FulfillmentError::Database(inner),
        }
    }
}

impl Retryable for FulfillmentError {
    fn is_transient(&self) -> bool {
        match self {
            FulfillmentError::Database(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for fulfillment operations.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_kind() {
        let validation: FulfillmentError =
            DomainError::Validation("bad quantity".to_string()).into();
        assert!(matches!(validation, FulfillmentError::Validation(_)));

        let not_found: FulfillmentError = DomainError::NotFound("no allocations".to_string()).into();
        assert!(matches!(not_found, FulfillmentError::NotFound(_)));
    }

    #[test]
    fn missing_locked_rows_map_to_not_found() {
        let err: FulfillmentError = DbError::RowsNotFound {
            table: "warehouse_inventory",
            requested: 3,
            found: 1,
        }
        .into();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
        assert!(err.to_string().contains("warehouse_inventory"));
    }

    #[test]
    fn only_transient_database_errors_retry() {
        let transient = FulfillmentError::Database(sqlx::Error::PoolTimedOut);
        assert!(transient.is_transient());

        let permanent = FulfillmentError::Validation("nope".to_string());
        assert!(!permanent.is_transient());
    }
}
