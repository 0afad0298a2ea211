//! Warehouse inventory repository.

use sqlx::{PgConnection, Row};
use uuid::Uuid;

use common::{BatchId, StatusId, UserId, WarehouseId};
use db_core::{BulkUpsert, LockMode, MergeStrategy, SqlValue, lock_rows_composite};
use domain::{StockAdjustment, StockKey, StockStatus, WarehouseStock};

use crate::error::Result;
use crate::tables;

/// Exclusively locks the stock rows for the given keys in one batched,
/// deterministically ordered statement.
pub async fn lock_stock_rows(conn: &mut PgConnection, keys: &[StockKey]) -> Result<u64> {
    let pairs: Vec<(Uuid, Uuid)> = keys
        .iter()
        .map(|key| (key.warehouse_id.as_uuid(), key.batch_id.as_uuid()))
        .collect();
    let locked =
        lock_rows_composite(conn, &tables::WAREHOUSE_INVENTORY, &pairs, LockMode::ForUpdate)
            .await?;
    Ok(locked)
}

/// Fetches the stock rows for the given keys.
///
/// The caller must hold locks on these rows; the read is then a consistent
/// snapshot for the rest of the transaction.
pub async fn fetch_stock_for_keys(
    conn: &mut PgConnection,
    keys: &[StockKey],
) -> Result<Vec<WarehouseStock>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let mut tuples = Vec::with_capacity(keys.len());
    for i in 0..keys.len() {
        tuples.push(format!("(${}, ${})", i * 2 + 1, i * 2 + 2));
    }
    let sql = format!(
        "SELECT warehouse_id, batch_id, warehouse_quantity, reserved_quantity, status_id \
         FROM warehouse_inventory \
         WHERE (warehouse_id, batch_id) IN ({}) \
         ORDER BY warehouse_id, batch_id",
        tuples.join(", "),
    );

    let mut query = sqlx::query(&sql);
    for key in keys {
        query = query
            .bind(key.warehouse_id.as_uuid())
            .bind(key.batch_id.as_uuid());
    }

    let rows = query.fetch_all(conn).await?;
    rows.iter()
        .map(|row| {
            Ok(WarehouseStock {
                warehouse_id: WarehouseId::from_uuid(row.try_get::<Uuid, _>("warehouse_id")?),
                batch_id: BatchId::from_uuid(row.try_get::<Uuid, _>("batch_id")?),
                warehouse_quantity: row.try_get("warehouse_quantity")?,
                reserved_quantity: row.try_get("reserved_quantity")?,
                status_id: row
                    .try_get::<Option<i32>, _>("status_id")?
                    .map(StatusId::new),
            })
        })
        .collect()
}

/// Applies the computed adjustments to the locked stock rows in one bulk
/// upsert, overwriting quantities and derived status.
pub async fn apply_adjustments(
    conn: &mut PgConnection,
    adjustments: &[StockAdjustment],
    in_stock: StatusId,
    out_of_stock: StatusId,
    user_id: UserId,
) -> Result<u64> {
    let upsert = BulkUpsert::new(
        "warehouse_inventory",
        &[
            "warehouse_id",
            "batch_id",
            "warehouse_quantity",
            "reserved_quantity",
            "status_id",
            "updated_by",
        ],
    )
    .on_conflict(&["warehouse_id", "batch_id"])
    .merge("warehouse_quantity", MergeStrategy::Overwrite)
    .merge("reserved_quantity", MergeStrategy::Overwrite)
    .merge("status_id", MergeStrategy::Overwrite)
    .merge("updated_by", MergeStrategy::Overwrite);

    let rows: Vec<Vec<SqlValue>> = adjustments
        .iter()
        .map(|adjustment| {
            let status_id = match adjustment.status {
                StockStatus::InStock => in_stock,
                StockStatus::OutOfStock => out_of_stock,
            };
            vec![
                SqlValue::from(adjustment.key.warehouse_id.as_uuid()),
                SqlValue::from(adjustment.key.batch_id.as_uuid()),
                SqlValue::from(adjustment.new_warehouse_quantity),
                SqlValue::from(adjustment.new_reserved_quantity),
                SqlValue::from(status_id.as_i32()),
                SqlValue::from(user_id.as_uuid()),
            ]
        })
        .collect();

    let affected = upsert.execute(conn, &rows).await?;
    Ok(affected)
}
