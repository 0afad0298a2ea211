//! Row-level locking primitives.
//!
//! All lock acquisition goes through one batched `SELECT … <lock mode>`
//! statement per call, with a deterministic `ORDER BY` over the primary key
//! so that two transactions locking overlapping key sets always acquire
//! their locks in the same order.

use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::error::{DbError, Result};

/// Postgres row-level lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `FOR UPDATE` - exclusive, blocks all other lockers.
    ForUpdate,
    /// `FOR NO KEY UPDATE` - exclusive, but permits key-share lockers.
    ForNoKeyUpdate,
    /// `FOR SHARE` - shared read lock.
    ForShare,
    /// `FOR KEY SHARE` - weakest mode, blocks only key updates.
    ForKeyShare,
}

impl LockMode {
    /// Returns the SQL locking clause for this mode.
    pub fn as_sql(&self) -> &'static str {
        match self {
            LockMode::ForUpdate => "FOR UPDATE",
            LockMode::ForNoKeyUpdate => "FOR NO KEY UPDATE",
            LockMode::ForShare => "FOR SHARE",
            LockMode::ForKeyShare => "FOR KEY SHARE",
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// Static table-to-primary-key configuration.
///
/// The lockable tables and their key columns are declared once as constants
/// by the caller; there is no runtime catalog lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableKey {
    /// Table name.
    pub table: &'static str,
    /// Primary-key column(s), in key order.
    pub key_columns: &'static [&'static str],
}

impl TableKey {
    fn require_arity(&self, supplied: usize) -> Result<()> {
        if self.key_columns.len() != supplied {
            return Err(DbError::KeyArity {
                table: self.table,
                expected: self.key_columns.len(),
                supplied,
            });
        }
        Ok(())
    }
}

fn single_key_lock_sql(key: &TableKey, mode: LockMode) -> String {
    let pk = key.key_columns[0];
    format!(
        "SELECT {pk} FROM {table} WHERE {pk} = ANY($1) ORDER BY {pk} {mode}",
        table = key.table,
        mode = mode.as_sql(),
    )
}

fn composite_key_lock_sql(key: &TableKey, pairs: usize, mode: LockMode) -> String {
    let (first, second) = (key.key_columns[0], key.key_columns[1]);
    let mut tuples = Vec::with_capacity(pairs);
    for i in 0..pairs {
        tuples.push(format!("(${}, ${})", i * 2 + 1, i * 2 + 2));
    }
    format!(
        "SELECT {first}, {second} FROM {table} WHERE ({first}, {second}) IN ({tuples}) \
         ORDER BY {first}, {second} {mode}",
        table = key.table,
        tuples = tuples.join(", "),
        mode = mode.as_sql(),
    )
}

/// Locks a single row by its UUID primary key.
///
/// Fails with [`DbError::RowsNotFound`] if the row does not exist.
pub async fn lock_row(
    conn: &mut PgConnection,
    key: &TableKey,
    id: Uuid,
    mode: LockMode,
) -> Result<()> {
    lock_rows(conn, key, &[id], mode).await?;
    Ok(())
}

/// Locks a set of rows by UUID primary key in one batched statement.
///
/// Duplicate ids are collapsed before locking. Returns the number of rows
/// locked; fails with [`DbError::RowsNotFound`] if any requested row is
/// missing. Must be called inside an open transaction - the locks are held
/// until the caller commits or rolls back.
pub async fn lock_rows(
    conn: &mut PgConnection,
    key: &TableKey,
    ids: &[Uuid],
    mode: LockMode,
) -> Result<u64> {
    key.require_arity(1)?;
    if ids.is_empty() {
        return Ok(0);
    }

    let mut unique: Vec<Uuid> = ids.to_vec();
    unique.sort();
    unique.dedup();

    let sql = single_key_lock_sql(key, mode);
    let rows = sqlx::query(&sql).bind(&unique).fetch_all(conn).await?;

    if rows.len() != unique.len() {
        return Err(DbError::RowsNotFound {
            table: key.table,
            requested: unique.len(),
            found: rows.len(),
        });
    }

    tracing::debug!(table = key.table, count = rows.len(), %mode, "rows locked");
    Ok(rows.len() as u64)
}

/// Locks a set of rows identified by a two-column composite key in one
/// batched statement.
///
/// Key pairs are sorted and deduplicated before locking so that concurrent
/// callers touching overlapping key sets serialize instead of deadlocking.
/// Fails with [`DbError::RowsNotFound`] if any requested row is missing.
pub async fn lock_rows_composite(
    conn: &mut PgConnection,
    key: &TableKey,
    keys: &[(Uuid, Uuid)],
    mode: LockMode,
) -> Result<u64> {
    key.require_arity(2)?;
    if keys.is_empty() {
        return Ok(0);
    }

    let mut unique: Vec<(Uuid, Uuid)> = keys.to_vec();
    unique.sort();
    unique.dedup();

    let sql = composite_key_lock_sql(key, unique.len(), mode);
    let mut query = sqlx::query(&sql);
    for (first, second) in &unique {
        query = query.bind(first).bind(second);
    }

    let rows = query.fetch_all(conn).await?;

    if rows.len() != unique.len() {
        // Name the missing keys: the caller usually wants to know which
        // inventory row vanished, not just how many.
        let locked: Vec<(Uuid, Uuid)> = rows
            .iter()
            .map(|r| (r.get::<Uuid, _>(0), r.get::<Uuid, _>(1)))
            .collect();
        let missing = unique.iter().find(|k| !locked.contains(*k));
        tracing::warn!(
            table = key.table,
            requested = unique.len(),
            found = rows.len(),
            missing = ?missing,
            "composite lock found fewer rows than requested"
        );
        return Err(DbError::RowsNotFound {
            table: key.table,
            requested: unique.len(),
            found: rows.len(),
        });
    }

    tracing::debug!(table = key.table, count = rows.len(), %mode, "rows locked");
    Ok(rows.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOCATIONS: TableKey = TableKey {
        table: "inventory_allocations",
        key_columns: &["id"],
    };

    const STOCK: TableKey = TableKey {
        table: "warehouse_inventory",
        key_columns: &["warehouse_id", "batch_id"],
    };

    #[test]
    fn lock_mode_sql() {
        assert_eq!(LockMode::ForUpdate.as_sql(), "FOR UPDATE");
        assert_eq!(LockMode::ForNoKeyUpdate.as_sql(), "FOR NO KEY UPDATE");
        assert_eq!(LockMode::ForShare.as_sql(), "FOR SHARE");
        assert_eq!(LockMode::ForKeyShare.as_sql(), "FOR KEY SHARE");
    }

    #[test]
    fn single_key_statement_orders_by_primary_key() {
        let sql = single_key_lock_sql(&ALLOCATIONS, LockMode::ForUpdate);
        assert_eq!(
            sql,
            "SELECT id FROM inventory_allocations WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        );
    }

    #[test]
    fn composite_key_statement_numbers_placeholders_in_pairs() {
        let sql = composite_key_lock_sql(&STOCK, 2, LockMode::ForUpdate);
        assert_eq!(
            sql,
            "SELECT warehouse_id, batch_id FROM warehouse_inventory \
             WHERE (warehouse_id, batch_id) IN (($1, $2), ($3, $4)) \
             ORDER BY warehouse_id, batch_id FOR UPDATE"
        );
    }

    #[test]
    fn composite_key_statement_share_mode() {
        let sql = composite_key_lock_sql(&STOCK, 1, LockMode::ForShare);
        assert!(sql.ends_with("ORDER BY warehouse_id, batch_id FOR SHARE"));
    }

    #[test]
    fn arity_is_checked() {
        assert!(ALLOCATIONS.require_arity(1).is_ok());
        let err = STOCK.require_arity(1).unwrap_err();
        match err {
            DbError::KeyArity {
                table,
                expected,
                supplied,
            } => {
                assert_eq!(table, "warehouse_inventory");
                assert_eq!(expected, 2);
                assert_eq!(supplied, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
