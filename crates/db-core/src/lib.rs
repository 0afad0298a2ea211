pub mod error;
pub mod lock;
pub mod retry;
pub mod upsert;

pub use error::{DbError, Result};
pub use lock::{LockMode, TableKey, lock_row, lock_rows, lock_rows_composite};
pub use retry::{Retryable, RetryPolicy, with_retry};
pub use upsert::{BulkUpsert, MergeStrategy, SqlValue};
