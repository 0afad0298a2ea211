//! Order and order-item repository.

use sqlx::{PgConnection, Row};
use uuid::Uuid;

use common::{OrderId, StatusId, UserId};

use crate::error::{FulfillmentError, Result};

/// The order fields fulfillment needs.
#[derive(Debug, Clone)]
pub struct OrderHeader {
    pub order_id: OrderId,
    pub order_number: String,
    pub status_id: StatusId,
}

/// Fetches and exclusively locks the order row.
///
/// Fails with [`FulfillmentError::NotFound`] if the order does not exist.
pub async fn get_order_for_update(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> Result<OrderHeader> {
    let row = sqlx::query(
        "SELECT id, order_number, status_id FROM orders WHERE id = $1 FOR UPDATE",
    )
    .bind(order_id.as_uuid())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| FulfillmentError::NotFound(format!("order not found: {order_id}")))?;

    Ok(OrderHeader {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_number: row.try_get("order_number")?,
        status_id: StatusId::new(row.try_get("status_id")?),
    })
}

/// Confirms every item on the order is fully allocated.
///
/// `blocking_status_ids` are the pending/partially-allocated item statuses;
/// any item still carrying one blocks fulfillment. Must run before any
/// mutation.
pub async fn ensure_fully_allocated(
    conn: &mut PgConnection,
    order_id: OrderId,
    blocking_status_ids: &[StatusId],
) -> Result<()> {
    let blocking: Vec<i32> = blocking_status_ids.iter().map(|s| s.as_i32()).collect();

    let unallocated = sqlx::query(
        "SELECT id FROM order_items WHERE order_id = $1 AND status_id = ANY($2) LIMIT 1",
    )
    .bind(order_id.as_uuid())
    .bind(&blocking)
    .fetch_optional(conn)
    .await?;

    if unallocated.is_some() {
        return Err(FulfillmentError::Validation(format!(
            "order {order_id} is not fully allocated"
        )));
    }
    Ok(())
}

/// Moves the order to a new status.
pub async fn update_order_status(
    conn: &mut PgConnection,
    order_id: OrderId,
    status_id: StatusId,
    user_id: UserId,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE orders SET status_id = $2, updated_by = $3, updated_at = now() WHERE id = $1",
    )
    .bind(order_id.as_uuid())
    .bind(status_id.as_i32())
    .bind(user_id.as_uuid())
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Moves every item of the order to a new status in one statement; items
/// track the order in lock-step.
pub async fn update_order_item_statuses_by_order_id(
    conn: &mut PgConnection,
    order_id: OrderId,
    status_id: StatusId,
    user_id: UserId,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE order_items SET status_id = $2, updated_by = $3, updated_at = now() \
         WHERE order_id = $1",
    )
    .bind(order_id.as_uuid())
    .bind(status_id.as_i32())
    .bind(user_id.as_uuid())
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}
