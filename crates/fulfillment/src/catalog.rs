//! Status catalog: the process-wide mapping from status codes to ids.
//!
//! Loaded once at startup from the pre-populated `statuses` table and
//! immutable afterwards; callers receive it by shared reference. The reverse
//! (id to code) lookup exists for the fulfillment transition guard, which
//! reasons over codes.

use std::collections::HashMap;

use sqlx::{PgPool, Row};

use common::StatusId;
use db_core::{RetryPolicy, with_retry};

use crate::error::{FulfillmentError, Result};

/// Read-only status code lookup.
#[derive(Debug, Clone)]
pub struct StatusCatalog {
    by_code: HashMap<String, StatusId>,
    by_id: HashMap<StatusId, String>,
}

impl StatusCatalog {
    /// Loads the catalog from the `statuses` table.
    ///
    /// The load is read-only, so it is retried as a whole on transient
    /// connection failures.
    pub async fn load(pool: &PgPool, retry: &RetryPolicy) -> Result<Self> {
        let rows = with_retry(retry, || async {
            sqlx::query("SELECT id, code FROM statuses")
                .fetch_all(pool)
                .await
        })
        .await?;

        let entries = rows.iter().map(|row| {
            (
                row.get::<String, _>("code"),
                StatusId::new(row.get::<i32, _>("id")),
            )
        });

        let catalog = Self::from_entries(entries);
        tracing::info!(statuses = catalog.len(), "status catalog loaded");
        Ok(catalog)
    }

    /// Builds a catalog from in-memory entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, StatusId)>) -> Self {
        let by_code: HashMap<String, StatusId> = entries.into_iter().collect();
        let by_id = by_code
            .iter()
            .map(|(code, id)| (*id, code.clone()))
            .collect();
        Self { by_code, by_id }
    }

    /// Resolves a status code to its catalog id.
    pub fn status_id(&self, code: &str) -> Result<StatusId> {
        self.by_code
            .get(code)
            .copied()
            .ok_or_else(|| FulfillmentError::NotFound(format!("unknown status code: {code}")))
    }

    /// Resolves a catalog id back to its status code.
    pub fn code(&self, id: StatusId) -> Result<&str> {
        self.by_id
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| FulfillmentError::NotFound(format!("unknown status id: {id}")))
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    /// Returns true if the catalog holds no entries.
    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use domain::codes;

    fn catalog() -> StatusCatalog {
        StatusCatalog::from_entries([
            (codes::ORDER_FULFILLED.to_string(), StatusId::new(1)),
            (codes::ALLOCATION_FULFILLED.to_string(), StatusId::new(2)),
            (codes::FULFILLMENT_PENDING.to_string(), StatusId::new(3)),
        ])
    }

    #[test]
    fn resolves_codes_both_ways() {
        let catalog = catalog();
        let id = catalog.status_id(codes::ALLOCATION_FULFILLED).unwrap();
        assert_eq!(id, StatusId::new(2));
        assert_eq!(catalog.code(id).unwrap(), codes::ALLOCATION_FULFILLED);
    }

    #[test]
    fn unknown_code_is_not_found() {
        let err = catalog().status_id("NOT_A_CODE").unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let err = catalog().code(StatusId::new(99)).unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }

    #[test]
    fn len_counts_entries() {
        assert_eq!(catalog().len(), 3);
        assert!(!catalog().is_empty());
        assert!(StatusCatalog::from_entries([]).is_empty());
    }
}
