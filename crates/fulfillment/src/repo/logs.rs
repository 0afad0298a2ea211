//! Inventory activity log repository. Append-only.

use sqlx::PgConnection;

use db_core::{BulkUpsert, SqlValue};
use domain::ActivityLogEntry;

use crate::error::Result;

/// Appends the checksummed activity log rows in one bulk insert.
pub async fn insert_activity_logs(
    conn: &mut PgConnection,
    logs: &[ActivityLogEntry],
) -> Result<u64> {
    let upsert = BulkUpsert::new(
        "inventory_activity_logs",
        &[
            "id",
            "action_type_id",
            "warehouse_id",
            "batch_id",
            "allocation_id",
            "order_id",
            "shipment_id",
            "fulfillment_id",
            "previous_quantity",
            "quantity_change",
            "new_quantity",
            "metadata",
            "checksum",
            "comments",
            "created_by",
        ],
    );

    let rows: Vec<Vec<SqlValue>> = logs
        .iter()
        .map(|log| {
            vec![
                SqlValue::from(log.id),
                SqlValue::from(log.action_type_id),
                SqlValue::from(log.warehouse_id.as_uuid()),
                SqlValue::from(log.batch_id.as_uuid()),
                SqlValue::from(log.allocation_id.as_uuid()),
                SqlValue::from(log.order_id.as_uuid()),
                SqlValue::from(log.shipment_id.as_uuid()),
                SqlValue::Uuid(log.fulfillment_id.map(|id| id.as_uuid())),
                SqlValue::from(log.previous_quantity),
                SqlValue::from(log.quantity_change),
                SqlValue::from(log.new_quantity),
                SqlValue::from(log.metadata.clone()),
                SqlValue::from(log.checksum.clone()),
                SqlValue::Text(log.comments.clone()),
                SqlValue::from(log.created_by.as_uuid()),
            ]
        })
        .collect();

    let affected = upsert.execute(conn, &rows).await?;
    Ok(affected)
}
