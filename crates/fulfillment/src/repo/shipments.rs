//! Outbound shipment and order fulfillment repository.

use sqlx::{PgConnection, Row};
use uuid::Uuid;

use common::{FulfillmentId, OrderItemId, ShipmentId, StatusId, UserId};
use db_core::{BulkUpsert, LockMode, MergeStrategy, SqlValue, lock_rows};
use domain::{FulfillmentInput, NewOutboundShipment, ShipmentBatchInput};

use crate::error::Result;
use crate::tables;

/// A persisted fulfillment row.
#[derive(Debug, Clone)]
pub struct FulfillmentRecord {
    pub fulfillment_id: FulfillmentId,
    pub order_item_id: OrderItemId,
    pub quantity_fulfilled: i64,
    pub status_id: StatusId,
}

/// Creates the shipment header with an initial status; tracking number and
/// shipped-at stay null until dispatch.
pub async fn insert_outbound_shipment(
    conn: &mut PgConnection,
    shipment: &NewOutboundShipment,
    status_id: StatusId,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO outbound_shipments \
         (id, order_id, warehouse_id, delivery_method_id, status_id, notes, created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(shipment.shipment_id.as_uuid())
    .bind(shipment.order_id.as_uuid())
    .bind(shipment.warehouse_id.as_uuid())
    .bind(shipment.delivery_method_id.map(|id| id.as_uuid()))
    .bind(status_id.as_i32())
    .bind(shipment.notes.clone())
    .bind(shipment.created_by.as_uuid())
    .execute(conn)
    .await?;

    Ok(())
}

/// Appends the shipment-batch lines in one bulk insert.
pub async fn insert_shipment_batches(
    conn: &mut PgConnection,
    batches: &[ShipmentBatchInput],
) -> Result<u64> {
    let upsert = BulkUpsert::new(
        "shipment_batches",
        &["id", "shipment_id", "batch_id", "quantity_shipped", "note", "created_by"],
    );

    let rows: Vec<Vec<SqlValue>> = batches
        .iter()
        .map(|batch| {
            vec![
                SqlValue::from(Uuid::new_v4()),
                SqlValue::from(batch.shipment_id.as_uuid()),
                SqlValue::from(batch.batch_id.as_uuid()),
                SqlValue::from(batch.quantity_shipped),
                SqlValue::Text(batch.note.clone()),
                SqlValue::from(batch.created_by.as_uuid()),
            ]
        })
        .collect();

    let affected = upsert.execute(conn, &rows).await?;
    Ok(affected)
}

/// Inserts the aggregated fulfillment rows.
///
/// On a `(order_item_id, shipment_id)` conflict the quantities accumulate
/// and the contributing allocation id lists concatenate, so re-running the
/// aggregation for the same shipment folds instead of duplicating.
pub async fn upsert_fulfillments(
    conn: &mut PgConnection,
    fulfillments: &[FulfillmentInput],
    status_id: StatusId,
) -> Result<u64> {
    let upsert = BulkUpsert::new(
        "order_fulfillments",
        &[
            "id",
            "order_item_id",
            "shipment_id",
            "quantity_fulfilled",
            "allocation_ids",
            "status_id",
            "notes",
            "created_by",
        ],
    )
    .on_conflict(&["order_item_id", "shipment_id"])
    .merge("id", MergeStrategy::Keep)
    .merge("quantity_fulfilled", MergeStrategy::Add)
    .merge("allocation_ids", MergeStrategy::MergeJson)
    .merge("status_id", MergeStrategy::Keep)
    .merge("notes", MergeStrategy::Coalesce)
    .merge("created_by", MergeStrategy::Keep);

    let rows: Vec<Vec<SqlValue>> = fulfillments
        .iter()
        .map(|fulfillment| {
            let allocation_ids = serde_json::to_value(&fulfillment.allocation_ids)
                .expect("allocation id list serializes");
            vec![
                SqlValue::from(Uuid::new_v4()),
                SqlValue::from(fulfillment.order_item_id.as_uuid()),
                SqlValue::from(fulfillment.shipment_id.as_uuid()),
                SqlValue::from(fulfillment.quantity_fulfilled),
                SqlValue::from(allocation_ids),
                SqlValue::from(status_id.as_i32()),
                SqlValue::Text(fulfillment.notes.clone()),
                SqlValue::from(fulfillment.created_by.as_uuid()),
            ]
        })
        .collect();

    let affected = upsert.execute(conn, &rows).await?;
    Ok(affected)
}

/// Fetches the persisted fulfillment rows for one shipment.
pub async fn fetch_fulfillments_for_shipment(
    conn: &mut PgConnection,
    shipment_id: ShipmentId,
) -> Result<Vec<FulfillmentRecord>> {
    let rows = sqlx::query(
        "SELECT id, order_item_id, quantity_fulfilled, status_id \
         FROM order_fulfillments WHERE shipment_id = $1 ORDER BY order_item_id",
    )
    .bind(shipment_id.as_uuid())
    .fetch_all(conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(FulfillmentRecord {
                fulfillment_id: FulfillmentId::from_uuid(row.try_get::<Uuid, _>("id")?),
                order_item_id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("order_item_id")?),
                quantity_fulfilled: row.try_get("quantity_fulfilled")?,
                status_id: StatusId::new(row.try_get("status_id")?),
            })
        })
        .collect()
}

/// Exclusively locks the given shipment rows.
pub async fn lock_shipments(conn: &mut PgConnection, shipment_ids: &[ShipmentId]) -> Result<u64> {
    let raw: Vec<Uuid> = shipment_ids.iter().map(|id| id.as_uuid()).collect();
    let locked = lock_rows(conn, &tables::OUTBOUND_SHIPMENTS, &raw, LockMode::ForUpdate).await?;
    Ok(locked)
}

/// Exclusively locks the given fulfillment rows.
pub async fn lock_fulfillments(
    conn: &mut PgConnection,
    fulfillment_ids: &[FulfillmentId],
) -> Result<u64> {
    let raw: Vec<Uuid> = fulfillment_ids.iter().map(|id| id.as_uuid()).collect();
    let locked = lock_rows(conn, &tables::ORDER_FULFILLMENTS, &raw, LockMode::ForUpdate).await?;
    Ok(locked)
}

/// Moves the given shipments to a new status in one statement.
pub async fn update_shipment_status(
    conn: &mut PgConnection,
    status_id: StatusId,
    user_id: UserId,
    shipment_ids: &[ShipmentId],
) -> Result<u64> {
    if shipment_ids.is_empty() {
        return Ok(0);
    }

    let raw: Vec<Uuid> = shipment_ids.iter().map(|id| id.as_uuid()).collect();
    let result = sqlx::query(
        "UPDATE outbound_shipments \
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

/// Fetches current statuses for the given fulfillments.
pub async fn fetch_fulfillment_statuses(
    conn: &mut PgConnection,
    fulfillment_ids: &[FulfillmentId],
) -> Result<Vec<(FulfillmentId, StatusId)>> {
    let raw: Vec<Uuid> = fulfillment_ids.iter().map(|id| id.as_uuid()).collect();
    let rows = sqlx::query(
        "SELECT id, status_id FROM order_fulfillments WHERE id = ANY($1) ORDER BY id",
    )
    .bind(raw)
    .fetch_all(conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok((
                FulfillmentId::from_uuid(row.try_get::<Uuid, _>("id")?),
                StatusId::new(row.try_get("status_id")?),
            ))
        })
        .collect()
}

/// Moves the given fulfillments to a new status in one statement.
///
/// Transition legality is the caller's concern; the engine validates with
/// the status guard before calling this.
pub async fn update_fulfillment_status(
    conn: &mut PgConnection,
    status_id: StatusId,
    user_id: UserId,
    fulfillment_ids: &[FulfillmentId],
) -> Result<u64> {
    if fulfillment_ids.is_empty() {
        return Ok(0);
    }

    let raw: Vec<Uuid> = fulfillment_ids.iter().map(|id| id.as_uuid()).collect();
    let result = sqlx::query(
        "UPDATE order_fulfillments \
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

/// Records carrier hand-off: sets the tracking number and shipped-at on a
/// dispatched shipment.
pub async fn mark_shipment_dispatched(
    conn: &mut PgConnection,
    shipment_id: ShipmentId,
    status_id: StatusId,
    tracking_number: &str,
    user_id: UserId,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE outbound_shipments \
         SET status_id = $2, tracking_number = $3, shipped_at = now(), \
             updated_by = $4, updated_at = now() \
         WHERE id = $1",
    )
    .bind(shipment_id.as_uuid())
    .bind(status_id.as_i32())
    .bind(tracking_number)
    .bind(user_id.as_uuid())
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}
