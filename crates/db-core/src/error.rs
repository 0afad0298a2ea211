use thiserror::Error;

/// Errors that can occur in the database primitive layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// A lock statement matched fewer rows than requested.
    #[error("{table}: requested {requested} rows to lock, found {found}")]
    RowsNotFound {
        table: &'static str,
        requested: usize,
        found: usize,
    },

    /// A caller-supplied key set does not match the table's primary-key arity.
    #[error("{table}: primary key has {expected} columns, caller supplied {supplied}")]
    KeyArity {
        table: &'static str,
        expected: usize,
        supplied: usize,
    },

    /// A bulk statement was built from inconsistent inputs.
    #[error("bulk upsert on {table}: {message}")]
    MalformedBulkInput {
        table: &'static str,
        message: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for database primitive operations.
pub type Result<T> = std::result::Result<T, DbError>;
