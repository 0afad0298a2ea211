//! Shipment and fulfillment record builders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use common::{
    AllocationId, BatchId, DeliveryMethodId, OrderId, OrderItemId, ShipmentId, UserId, WarehouseId,
};

use crate::allocation::AllocationMeta;

/// A shipment header to be created for one fulfillment action.
///
/// Tracking number and shipped-at are unset at creation; they are filled in
/// when the shipment is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOutboundShipment {
    pub shipment_id: ShipmentId,
    pub order_id: OrderId,
    pub warehouse_id: WarehouseId,
    pub delivery_method_id: Option<DeliveryMethodId>,
    pub notes: Option<String>,
    pub created_by: UserId,
}

impl NewOutboundShipment {
    /// Creates a shipment header with a fresh id.
    pub fn new(
        order_id: OrderId,
        warehouse_id: WarehouseId,
        delivery_method_id: Option<DeliveryMethodId>,
        notes: Option<String>,
        created_by: UserId,
    ) -> Self {
        Self {
            shipment_id: ShipmentId::new(),
            order_id,
            warehouse_id,
            delivery_method_id,
            notes,
            created_by,
        }
    }
}

/// One shipment-batch line: units of a batch leaving the warehouse on a
/// shipment. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentBatchInput {
    pub shipment_id: ShipmentId,
    pub batch_id: BatchId,
    pub quantity_shipped: i64,
    pub note: Option<String>,
    pub created_by: UserId,
}

/// Builds one shipment-batch line per allocation, shipping exactly the
/// allocated quantity.
pub fn build_shipment_batch_inputs(
    allocations: &[AllocationMeta],
    shipment_id: ShipmentId,
    note: Option<&str>,
    created_by: UserId,
) -> Vec<ShipmentBatchInput> {
    allocations
        .iter()
        .map(|allocation| ShipmentBatchInput {
            shipment_id,
            batch_id: allocation.batch_id,
            quantity_shipped: allocation.allocated_quantity,
            note: note.map(str::to_string),
            created_by,
        })
        .collect()
}

/// One fulfillment record: everything shipped for one order item on one
/// shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentInput {
    pub order_item_id: OrderItemId,
    pub shipment_id: ShipmentId,
    /// Sum of the allocated quantities consumed for this item.
    pub quantity_fulfilled: i64,
    /// Every allocation that contributed to this record.
    pub allocation_ids: Vec<AllocationId>,
    pub notes: Option<String>,
    pub created_by: UserId,
}

/// Groups allocations by `(order_item_id, shipment_id)` into fulfillment
/// records.
///
/// Grouping uses a BTreeMap keyed on the pair, so the output is identical
/// whatever order the allocations arrive in: one record per pair, quantities
/// summed, contributing allocation ids accumulated in input order.
pub fn build_fulfillment_inputs(
    allocations: &[AllocationMeta],
    shipment_id: ShipmentId,
    created_by: UserId,
    notes: Option<&str>,
) -> Vec<FulfillmentInput> {
    let mut grouped: BTreeMap<OrderItemId, FulfillmentInput> = BTreeMap::new();

    for allocation in allocations {
        grouped
            .entry(allocation.order_item_id)
            .and_modify(|record| {
                record.quantity_fulfilled += allocation.allocated_quantity;
                record.allocation_ids.push(allocation.allocation_id);
            })
            .or_insert_with(|| FulfillmentInput {
                order_item_id: allocation.order_item_id,
                shipment_id,
                quantity_fulfilled: allocation.allocated_quantity,
                allocation_ids: vec![allocation.allocation_id],
                notes: notes.map(str::to_string),
                created_by,
            });
    }

    grouped.into_values().collect()
}
