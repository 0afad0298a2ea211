//! Checksummed inventory activity logs.
//!
//! Every inventory mutation appends one immutable log row per consumed
//! allocation, carrying a before/after snapshot and a deterministic
//! checksum over the mutation's canonical fields. The checksum is computed
//! over a null-stripped, key-sorted JSON document so re-computation always
//! reproduces it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use common::{AllocationId, BatchId, FulfillmentId, OrderId, OrderItemId, ShipmentId, UserId, WarehouseId};

use crate::error::{DomainError, Result};
use crate::inventory::{EnrichedAllocation, StockAdjustment, StockKey};

/// Scope tag recorded on every fulfillment-driven log row.
const LOG_SCOPE: &str = "warehouse_inventory";

/// Source type tag linking a log row back to the fulfillment that caused it.
const LOG_SOURCE_TYPE: &str = "order_fulfillment";

/// One immutable audit row for an inventory mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub action_type_id: i32,
    pub warehouse_id: WarehouseId,
    pub batch_id: BatchId,
    pub allocation_id: AllocationId,
    pub order_id: OrderId,
    pub shipment_id: ShipmentId,
    pub fulfillment_id: Option<FulfillmentId>,
    /// Warehouse quantity before the adjustment.
    pub previous_quantity: i64,
    /// Signed delta applied; negative for outbound fulfillment.
    pub quantity_change: i64,
    /// Warehouse quantity after the adjustment.
    pub new_quantity: i64,
    /// Identifier context, null fields stripped.
    pub metadata: Value,
    /// SHA-256 over the canonical mutation fields.
    pub checksum: String,
    pub comments: Option<String>,
    pub created_by: UserId,
}

/// Shared context for one fulfillment's log rows.
#[derive(Debug, Clone)]
pub struct LogContext<'a> {
    pub action_type_id: i32,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub order_number: &'a str,
    pub shipment_id: ShipmentId,
    /// Fulfillment row ids keyed by order item, as persisted.
    pub fulfillment_by_item: &'a HashMap<OrderItemId, FulfillmentId>,
    pub comments: Option<&'a str>,
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Computes the deterministic checksum of a canonical field set.
///
/// Null fields are stripped before hashing; the BTreeMap key order fixes
/// the serialized field order, so the same fields always hash the same.
pub fn checksum(fields: &BTreeMap<&'static str, Value>) -> String {
    let document: serde_json::Map<String, Value> = fields
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect();

    let canonical =
        serde_json::to_string(&Value::Object(document)).expect("canonical document serializes");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex_string(hasher.finalize().as_slice())
}

fn strip_nulls(fields: BTreeMap<&'static str, Value>) -> Value {
    let map: serde_json::Map<String, Value> = fields
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    Value::Object(map)
}

fn json_opt<T: ToString>(value: Option<T>) -> Value {
    match value {
        Some(v) => Value::String(v.to_string()),
        None => Value::Null,
    }
}

/// Builds one log row for one consumed allocation.
fn build_fulfillment_log_entry(
    enriched: &EnrichedAllocation,
    adjustment: &StockAdjustment,
    ctx: &LogContext<'_>,
) -> ActivityLogEntry {
    let allocation = &enriched.allocation;
    let fulfillment_id = ctx.fulfillment_by_item.get(&allocation.order_item_id).copied();
    let quantity_change = -allocation.allocated_quantity;

    let metadata = strip_nulls(BTreeMap::from([
        ("allocation_id", Value::String(allocation.allocation_id.to_string())),
        ("batch_id", Value::String(allocation.batch_id.to_string())),
        ("fulfillment_id", json_opt(fulfillment_id)),
        ("order_item_id", Value::String(allocation.order_item_id.to_string())),
        ("order_number", Value::String(ctx.order_number.to_string())),
        ("reserved_quantity_after", Value::from(adjustment.new_reserved_quantity)),
        ("reserved_quantity_before", Value::from(adjustment.previous_reserved_quantity)),
        ("shipment_id", Value::String(ctx.shipment_id.to_string())),
    ]));

    let canonical = BTreeMap::from([
        ("action_type_id", Value::from(ctx.action_type_id)),
        ("allocation_id", Value::String(allocation.allocation_id.to_string())),
        ("batch_id", Value::String(allocation.batch_id.to_string())),
        ("comments", json_opt(ctx.comments)),
        ("created_by", Value::String(ctx.user_id.to_string())),
        ("new_quantity", Value::from(adjustment.new_warehouse_quantity)),
        ("order_id", Value::String(ctx.order_id.to_string())),
        ("order_number", Value::String(ctx.order_number.to_string())),
        ("previous_quantity", Value::from(adjustment.previous_warehouse_quantity)),
        ("quantity_change", Value::from(quantity_change)),
        ("scope", Value::String(LOG_SCOPE.to_string())),
        ("shipment_id", Value::String(ctx.shipment_id.to_string())),
        ("source_ref", json_opt(fulfillment_id)),
        ("source_type", Value::String(LOG_SOURCE_TYPE.to_string())),
        ("status", Value::String(adjustment.status.as_code().to_string())),
        ("warehouse_id", Value::String(allocation.warehouse_id.to_string())),
    ]);

    ActivityLogEntry {
        id: Uuid::new_v4(),
        action_type_id: ctx.action_type_id,
        warehouse_id: allocation.warehouse_id,
        batch_id: allocation.batch_id,
        allocation_id: allocation.allocation_id,
        order_id: ctx.order_id,
        shipment_id: ctx.shipment_id,
        fulfillment_id,
        previous_quantity: adjustment.previous_warehouse_quantity,
        quantity_change,
        new_quantity: adjustment.new_warehouse_quantity,
        metadata,
        checksum: checksum(&canonical),
        comments: ctx.comments.map(str::to_string),
        created_by: ctx.user_id,
    }
}

/// Builds one checksummed log row per enriched allocation, looking up each
/// allocation's adjustment by stock key.
///
/// Fails with [`DomainError::NotFound`] if an allocation has no computed
/// adjustment - the caller's calculation step must have covered every
/// consumed key.
pub fn build_inventory_activity_logs(
    enriched: &[EnrichedAllocation],
    adjustments: &BTreeMap<StockKey, StockAdjustment>,
    ctx: &LogContext<'_>,
) -> Result<Vec<ActivityLogEntry>> {
    enriched
        .iter()
        .map(|allocation| {
            let adjustment = adjustments.get(&allocation.key()).ok_or_else(|| {
                DomainError::NotFound(format!(
                    "no inventory adjustment calculated for {}",
                    allocation.key()
                ))
            })?;
            Ok(build_fulfillment_log_entry(allocation, adjustment, ctx))
        })
        .collect()
}
