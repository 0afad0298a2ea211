//! Retry with exponential backoff for transient database failures.
//!
//! Only connection-level failures are retried; business and constraint
//! errors surface immediately. A retried operation must be read-only or
//! re-run its whole transaction - retrying a single statement inside an
//! open transaction would replay a partial unit.

use std::future::Future;
use std::time::Duration;

/// Backoff configuration for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given retry count and base delay.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Classifies errors as transient (worth retrying) or permanent.
pub trait Retryable {
    /// Returns true if the operation that produced this error may succeed
    /// when re-run.
    fn is_transient(&self) -> bool;
}

impl Retryable for sqlx::Error {
    fn is_transient(&self) -> bool {
        match self {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db) => {
                // 08xxx: connection exceptions; 40001/40P01: serialization
                // failure and deadlock, both safe to re-run as a fresh unit.
                match db.code() {
                    Some(code) => {
                        code.starts_with("08") || code == "40001" || code == "40P01"
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }
}

impl Retryable for crate::error::DbError {
    fn is_transient(&self) -> bool {
        match self {
            crate::error::DbError::Database(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Runs `op`, retrying transient failures with exponential backoff.
///
/// `op` is invoked up to `1 + policy.max_retries` times. The final error is
/// returned unchanged once retries are exhausted or a permanent error is
/// seen.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> std::result::Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempt);
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient database error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
