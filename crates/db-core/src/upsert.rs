//! Generic multi-row `INSERT … ON CONFLICT` with per-column merge
//! strategies.
//!
//! One statement is generated per call regardless of row count; every value
//! is bound as a typed parameter. The strategy set is a closed enum so a
//! misspelled strategy cannot reach the database.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;
use uuid::Uuid;

use crate::error::{DbError, Result};

/// How a column is reconciled when an inserted row conflicts with an
/// existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Replace the stored value with the incoming one.
    Overwrite,
    /// Numeric: stored + incoming.
    Add,
    /// Numeric: stored - incoming.
    Subtract,
    /// Numeric: greatest of stored and incoming.
    Max,
    /// Numeric: least of stored and incoming.
    Min,
    /// Incoming value unless it is NULL, else keep stored.
    Coalesce,
    /// Text: stored and incoming joined with a newline, NULLs dropped.
    AppendText,
    /// JSONB: stored || incoming (array or object concatenation).
    MergeJson,
    /// Leave the stored value untouched.
    Keep,
}

impl MergeStrategy {
    /// Returns the `DO UPDATE SET` expression for `column`, or None when the
    /// stored value is kept.
    fn merge_expr(&self, table: &str, column: &str) -> Option<String> {
        match self {
            MergeStrategy::Overwrite => Some(format!("EXCLUDED.{column}")),
            MergeStrategy::Add => Some(format!("{table}.{column} + EXCLUDED.{column}")),
            MergeStrategy::Subtract => Some(format!("{table}.{column} - EXCLUDED.{column}")),
            MergeStrategy::Max => Some(format!(
                "GREATEST({table}.{column}, EXCLUDED.{column})"
            )),
            MergeStrategy::Min => Some(format!("LEAST({table}.{column}, EXCLUDED.{column})")),
            MergeStrategy::Coalesce => Some(format!(
                "COALESCE(EXCLUDED.{column}, {table}.{column})"
            )),
            MergeStrategy::AppendText => Some(format!(
                "NULLIF(concat_ws(E'\\n', {table}.{column}, EXCLUDED.{column}), '')"
            )),
            MergeStrategy::MergeJson => Some(format!(
                "CASE WHEN {table}.{column} IS NULL THEN EXCLUDED.{column} \
                 WHEN EXCLUDED.{column} IS NULL THEN {table}.{column} \
                 ELSE {table}.{column} || EXCLUDED.{column} END"
            )),
            MergeStrategy::Keep => None,
        }
    }
}

/// A typed SQL parameter. Each variant carries an Option so NULLs stay
/// typed at the wire level.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Uuid(Option<Uuid>),
    Text(Option<String>),
    I32(Option<i32>),
    I64(Option<i64>),
    Bool(Option<bool>),
    Json(Option<serde_json::Value>),
    Timestamp(Option<DateTime<Utc>>),
}

impl SqlValue {
    fn bind_to<'q>(
        &self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlValue::Uuid(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::I32(v) => query.bind(*v),
            SqlValue::I64(v) => query.bind(*v),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Json(v) => query.bind(v.clone()),
            SqlValue::Timestamp(v) => query.bind(*v),
        }
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(Some(v))
    }
}

impl From<Option<Uuid>> for SqlValue {
    fn from(v: Option<Uuid>) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(Some(v))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(Some(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(Some(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(Some(v))
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(Some(v))
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        SqlValue::Timestamp(v)
    }
}

/// Builder for a parameterized multi-row insert/upsert.
///
/// Without a conflict target the statement is a plain multi-row INSERT.
/// With one, every non-key column defaults to [`MergeStrategy::Overwrite`]
/// unless overridden via [`BulkUpsert::merge`]; if every column resolves to
/// [`MergeStrategy::Keep`] the statement degrades to `DO NOTHING`.
#[derive(Debug, Clone)]
pub struct BulkUpsert {
    table: &'static str,
    columns: &'static [&'static str],
    conflict_target: &'static [&'static str],
    merges: Vec<(&'static str, MergeStrategy)>,
}

impl BulkUpsert {
    /// Creates a bulk insert into `table` over the given columns.
    pub fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            conflict_target: &[],
            merges: Vec::new(),
        }
    }

    /// Declares the conflict target (unique key) that turns the insert into
    /// an upsert.
    pub fn on_conflict(mut self, target: &'static [&'static str]) -> Self {
        self.conflict_target = target;
        self
    }

    /// Overrides the merge strategy for one column.
    pub fn merge(mut self, column: &'static str, strategy: MergeStrategy) -> Self {
        self.merges.push((column, strategy));
        self
    }

    fn strategy_for(&self, column: &'static str) -> MergeStrategy {
        self.merges
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, s)| *s)
            .unwrap_or(MergeStrategy::Overwrite)
    }

    fn validate(&self, rows: &[Vec<SqlValue>]) -> Result<()> {
        if self.columns.is_empty() {
            return Err(DbError::MalformedBulkInput {
                table: self.table,
                message: "no columns declared".to_string(),
            });
        }
        if rows.is_empty() {
            return Err(DbError::MalformedBulkInput {
                table: self.table,
                message: "no rows supplied".to_string(),
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(DbError::MalformedBulkInput {
                    table: self.table,
                    message: format!(
                        "row {i} has {} values, expected {}",
                        row.len(),
                        self.columns.len()
                    ),
                });
            }
        }
        for target in self.conflict_target {
            if !self.columns.contains(target) {
                return Err(DbError::MalformedBulkInput {
                    table: self.table,
                    message: format!("conflict column {target} is not an inserted column"),
                });
            }
        }
        for (column, _) in &self.merges {
            if !self.columns.contains(column) {
                return Err(DbError::MalformedBulkInput {
                    table: self.table,
                    message: format!("merge column {column} is not an inserted column"),
                });
            }
        }
        Ok(())
    }

    /// Renders the statement for `row_count` rows.
    pub fn sql(&self, row_count: usize) -> String {
        let width = self.columns.len();
        let mut tuples = Vec::with_capacity(row_count);
        for r in 0..row_count {
            let placeholders: Vec<String> =
                (0..width).map(|c| format!("${}", r * width + c + 1)).collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let mut sql = format!(
            "INSERT INTO {table} ({columns}) VALUES {tuples}",
            table = self.table,
            columns = self.columns.join(", "),
            tuples = tuples.join(", "),
        );

        if !self.conflict_target.is_empty() {
            let assignments: Vec<String> = self
                .columns
                .iter()
                .copied()
                .filter(|c| !self.conflict_target.contains(c))
                .filter_map(|c| {
                    self.strategy_for(c)
                        .merge_expr(self.table, c)
                        .map(|expr| format!("{c} = {expr}"))
                })
                .collect();

            if assignments.is_empty() {
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO NOTHING",
                    self.conflict_target.join(", ")
                ));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    self.conflict_target.join(", "),
                    assignments.join(", ")
                ));
            }
        }

        sql
    }

    /// Executes the statement, binding every row value in order.
    ///
    /// Returns the number of rows affected.
    pub async fn execute(&self, conn: &mut PgConnection, rows: &[Vec<SqlValue>]) -> Result<u64> {
        self.validate(rows)?;

        let sql = self.sql(rows.len());
        let mut query = sqlx::query(&sql);
        for row in rows {
            for value in row {
                query = value.bind_to(query);
            }
        }

        let result = query.execute(conn).await?;
        tracing::debug!(
            table = self.table,
            rows = rows.len(),
            affected = result.rows_affected(),
            "bulk upsert applied"
        );
        Ok(result.rows_affected())
    }
}
