//! Inventory allocation repository.

use sqlx::{PgConnection, Row};
use uuid::Uuid;

use common::{AllocationId, BatchId, OrderId, OrderItemId, StatusId, UserId, WarehouseId};
use db_core::{LockMode, lock_rows};
use domain::AllocationMeta;

use crate::error::Result;
use crate::tables;

fn row_to_allocation(row: &sqlx::postgres::PgRow) -> std::result::Result<AllocationMeta, sqlx::Error> {
    Ok(AllocationMeta {
        allocation_id: AllocationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_item_id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("order_item_id")?),
        warehouse_id: WarehouseId::from_uuid(row.try_get::<Uuid, _>("warehouse_id")?),
        batch_id: BatchId::from_uuid(row.try_get::<Uuid, _>("batch_id")?),
        allocated_quantity: row.try_get("allocated_quantity")?,
        status_id: StatusId::new(row.try_get("status_id")?),
    })
}

/// Fetches the order's allocations, all of them or the given subset.
pub async fn get_allocations_by_order_id(
    conn: &mut PgConnection,
    order_id: OrderId,
    allocation_ids: Option<&[AllocationId]>,
) -> Result<Vec<AllocationMeta>> {
    let rows = match allocation_ids {
        None => {
            sqlx::query(
                "SELECT a.id, a.order_item_id, a.warehouse_id, a.batch_id, \
                        a.allocated_quantity, a.status_id \
                 FROM inventory_allocations a \
                 JOIN order_items oi ON oi.id = a.order_item_id \
                 WHERE oi.order_id = $1 \
                 ORDER BY a.id",
            )
            .bind(order_id.as_uuid())
            .fetch_all(conn)
            .await?
        }
        Some(ids) => {
            let raw: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
            sqlx::query(
                "SELECT a.id, a.order_item_id, a.warehouse_id, a.batch_id, \
                        a.allocated_quantity, a.status_id \
                 FROM inventory_allocations a \
                 JOIN order_items oi ON oi.id = a.order_item_id \
                 WHERE oi.order_id = $1 AND a.id = ANY($2) \
                 ORDER BY a.id",
            )
            .bind(order_id.as_uuid())
            .bind(raw)
            .fetch_all(conn)
            .await?
        }
    };

    rows.iter()
        .map(|row| row_to_allocation(row).map_err(Into::into))
        .collect()
}

/// Exclusively locks the given allocation rows.
pub async fn lock_allocations(
    conn: &mut PgConnection,
    allocation_ids: &[AllocationId],
) -> Result<u64> {
    let raw: Vec<Uuid> = allocation_ids.iter().map(|id| id.as_uuid()).collect();
    let locked = lock_rows(conn, &tables::INVENTORY_ALLOCATIONS, &raw, LockMode::ForUpdate).await?;
    Ok(locked)
}

/// Moves the given allocations to a new status in one statement.
pub async fn update_allocation_status(
    conn: &mut PgConnection,
    status_id: StatusId,
    user_id: UserId,
    allocation_ids: &[AllocationId],
) -> Result<u64> {
    if allocation_ids.is_empty() {
        return Ok(0);
    }

    let raw: Vec<Uuid> = allocation_ids.iter().map(|id| id.as_uuid()).collect();
    let result = sqlx::query(
        "UPDATE inventory_allocations \
         SET status_id = $1, updated_by = $2, updated_at = now() \
         WHERE id = ANY($3)",
    )
    .bind(status_id.as_i32())
    .bind(user_id.as_uuid())
    .bind(raw)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}
