//! Allocation row shape and the rules that gate fulfillment on it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use common::{AllocationId, BatchId, OrderItemId, StatusId, WarehouseId};

use crate::error::{DomainError, Result};

/// One inventory allocation: a reservation of stock from a warehouse batch
/// against a single order item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationMeta {
    /// The allocation row id.
    pub allocation_id: AllocationId,
    /// The order item this allocation reserves stock for.
    pub order_item_id: OrderItemId,
    /// Warehouse holding the reserved stock.
    pub warehouse_id: WarehouseId,
    /// Batch the stock is drawn from.
    pub batch_id: BatchId,
    /// Units reserved; always positive for a live allocation.
    pub allocated_quantity: i64,
    /// Current allocation status.
    pub status_id: StatusId,
}

/// Checks that an allocation set is non-empty and every row is well-formed.
///
/// Fails with [`DomainError::NotFound`] on an empty set and
/// [`DomainError::Validation`] on a nil id reference or a non-positive
/// quantity. Runs before any mutation.
pub fn assert_allocations_valid(allocations: &[AllocationMeta]) -> Result<()> {
    if allocations.is_empty() {
        return Err(DomainError::NotFound(
            "no allocations found for order".to_string(),
        ));
    }

    for allocation in allocations {
        if allocation.allocation_id.is_nil()
            || allocation.warehouse_id.is_nil()
            || allocation.batch_id.is_nil()
        {
            return Err(DomainError::Validation(format!(
                "allocation {} is missing a warehouse or batch reference",
                allocation.allocation_id
            )));
        }
        if allocation.allocated_quantity <= 0 {
            return Err(DomainError::Validation(format!(
                "allocation {} has non-positive quantity {}",
                allocation.allocation_id, allocation.allocated_quantity
            )));
        }
    }

    Ok(())
}

/// Enforces the single-warehouse rule: a fulfillment may only consume
/// allocations from one warehouse.
///
/// Returns that warehouse's id, or fails with [`DomainError::Validation`]
/// naming every offending warehouse so the caller can split the fulfillment
/// per warehouse.
pub fn single_warehouse_id(allocations: &[AllocationMeta]) -> Result<WarehouseId> {
    let warehouses: BTreeSet<WarehouseId> =
        allocations.iter().map(|a| a.warehouse_id).collect();

    match warehouses.len() {
        0 => Err(DomainError::NotFound(
            "no allocations found for order".to_string(),
        )),
        1 => Ok(*warehouses.iter().next().expect("set has one element")),
        _ => {
            let ids: Vec<String> = warehouses.iter().map(|w| w.to_string()).collect();
            Err(DomainError::Validation(format!(
                "allocations span multiple warehouses ({}); split the fulfillment per warehouse",
                ids.join(", ")
            )))
        }
    }
}
