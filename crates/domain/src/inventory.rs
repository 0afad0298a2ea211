//! Warehouse stock rows and the fulfillment adjustment arithmetic.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use common::{BatchId, StatusId, WarehouseId};

use crate::allocation::AllocationMeta;
use crate::error::{DomainError, Result};
use crate::status::StockStatus;

/// Composite key of a warehouse inventory row.
///
/// Used directly as a map key; the Ord impl gives deterministic iteration
/// and lock ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StockKey {
    pub warehouse_id: WarehouseId,
    pub batch_id: BatchId,
}

impl StockKey {
    /// Creates a stock key.
    pub fn new(warehouse_id: WarehouseId, batch_id: BatchId) -> Self {
        Self {
            warehouse_id,
            batch_id,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.warehouse_id, self.batch_id)
    }
}

/// Current stock of one `(warehouse, batch)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseStock {
    pub warehouse_id: WarehouseId,
    pub batch_id: BatchId,
    /// Total units physically on hand.
    pub warehouse_quantity: i64,
    /// Units held by open allocations.
    pub reserved_quantity: i64,
    /// Current stock status, if one has been derived.
    pub status_id: Option<StatusId>,
}

impl WarehouseStock {
    /// Returns this row's composite key.
    pub fn key(&self) -> StockKey {
        StockKey::new(self.warehouse_id, self.batch_id)
    }

    /// Sellable remainder: on hand minus reserved.
    pub fn available_quantity(&self) -> i64 {
        self.warehouse_quantity - self.reserved_quantity
    }
}

/// An allocation joined to the warehouse stock row it draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedAllocation {
    pub allocation: AllocationMeta,
    /// Warehouse quantity before adjustment.
    pub warehouse_quantity: i64,
    /// Reserved quantity before adjustment.
    pub reserved_quantity: i64,
    /// Derived sellable remainder before adjustment.
    pub available_quantity: i64,
    /// The stock row's status at join time.
    pub stock_status_id: Option<StatusId>,
}

impl EnrichedAllocation {
    /// Returns the allocation's stock key.
    pub fn key(&self) -> StockKey {
        StockKey::new(self.allocation.warehouse_id, self.allocation.batch_id)
    }
}

/// Joins each allocation to its warehouse stock row via an O(1) lookup map.
///
/// Fails with [`DomainError::NotFound`] if any allocation references a
/// `(warehouse, batch)` pair with no stock row - a missing row means the
/// reservation and the stock table have diverged, which must abort the
/// fulfillment.
pub fn enrich_allocations(
    allocations: &[AllocationMeta],
    stock: &[WarehouseStock],
) -> Result<Vec<EnrichedAllocation>> {
    let by_key: HashMap<StockKey, &WarehouseStock> =
        stock.iter().map(|row| (row.key(), row)).collect();

    allocations
        .iter()
        .map(|allocation| {
            let key = StockKey::new(allocation.warehouse_id, allocation.batch_id);
            let row = by_key.get(&key).ok_or_else(|| {
                DomainError::NotFound(format!(
                    "no warehouse inventory row for allocation {} at {key}",
                    allocation.allocation_id
                ))
            })?;
            Ok(EnrichedAllocation {
                allocation: allocation.clone(),
                warehouse_quantity: row.warehouse_quantity,
                reserved_quantity: row.reserved_quantity,
                available_quantity: row.available_quantity(),
                stock_status_id: row.status_id,
            })
        })
        .collect()
}

/// Sums allocated quantities per stock key.
///
/// The adjustment calculator assumes one entry per key; this is the
/// pre-aggregation step that guarantees it.
pub fn aggregate_consumed_by_key(allocations: &[AllocationMeta]) -> BTreeMap<StockKey, i64> {
    let mut consumed = BTreeMap::new();
    for allocation in allocations {
        let key = StockKey::new(allocation.warehouse_id, allocation.batch_id);
        *consumed.entry(key).or_insert(0) += allocation.allocated_quantity;
    }
    consumed
}

/// The computed post-fulfillment state of one stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub key: StockKey,
    /// Warehouse quantity before the adjustment.
    pub previous_warehouse_quantity: i64,
    /// Reserved quantity before the adjustment.
    pub previous_reserved_quantity: i64,
    /// Warehouse quantity after the adjustment, floor-clamped at zero.
    pub new_warehouse_quantity: i64,
    /// Reserved quantity after the adjustment, floor-clamped at zero.
    pub new_reserved_quantity: i64,
    /// Stock status derived from the new warehouse quantity.
    pub status: StockStatus,
}

/// Computes the new stock state for every consumed `(warehouse, batch)` key.
///
/// Fulfillment quantities are expected never to exceed stock (enforced
/// upstream at reservation time); the clamp at zero guards against drift.
pub fn calculate_inventory_adjustments(
    stock: &[WarehouseStock],
    consumed_by_key: &BTreeMap<StockKey, i64>,
) -> Vec<StockAdjustment> {
    let by_key: HashMap<StockKey, &WarehouseStock> =
        stock.iter().map(|row| (row.key(), row)).collect();

    consumed_by_key
        .iter()
        .filter_map(|(key, consumed)| {
            by_key.get(key).map(|row| {
                let new_warehouse_quantity = (row.warehouse_quantity - consumed).max(0);
                let new_reserved_quantity = (row.reserved_quantity - consumed).max(0);
                StockAdjustment {
                    key: *key,
                    previous_warehouse_quantity: row.warehouse_quantity,
                    previous_reserved_quantity: row.reserved_quantity,
                    new_warehouse_quantity,
                    new_reserved_quantity,
                    status: StockStatus::from_quantity(new_warehouse_quantity),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use common::{AllocationId, OrderItemId};

    fn stock(key: StockKey, warehouse_quantity: i64, reserved_quantity: i64) -> WarehouseStock {
        WarehouseStock {
            warehouse_id: key.warehouse_id,
            batch_id: key.batch_id,
            warehouse_quantity,
            reserved_quantity,
            status_id: None,
        }
    }

    fn allocation(key: StockKey, quantity: i64) -> AllocationMeta {
        AllocationMeta {
            allocation_id: AllocationId::new(),
            order_item_id: OrderItemId::new(),
            warehouse_id: key.warehouse_id,
            batch_id: key.batch_id,
            allocated_quantity: quantity,
            status_id: StatusId::new(1),
        }
    }

    fn some_key() -> StockKey {
        StockKey::new(WarehouseId::new(), BatchId::new())
    }

    #[test]
    fn available_quantity_is_derived() {
        let row = stock(some_key(), 100, 20);
        assert_eq!(row.available_quantity(), 80);
    }

    #[test]
    fn enrichment_joins_by_key() {
        let key = some_key();
        let enriched =
            enrich_allocations(&[allocation(key, 10)], &[stock(key, 100, 20)]).unwrap();

        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].warehouse_quantity, 100);
        assert_eq!(enriched[0].reserved_quantity, 20);
        assert_eq!(enriched[0].available_quantity, 80);
        assert_eq!(enriched[0].key(), key);
    }

    #[test]
    fn enrichment_fails_on_missing_stock_row() {
        let err = enrich_allocations(&[allocation(some_key(), 10)], &[]).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn aggregation_sums_per_key() {
        let key_a = some_key();
        let key_b = some_key();
        let allocations = vec![
            allocation(key_a, 10),
            allocation(key_b, 7),
            allocation(key_a, 5),
        ];

        let consumed = aggregate_consumed_by_key(&allocations);
        assert_eq!(consumed.len(), 2);
        assert_eq!(consumed[&key_a], 15);
        assert_eq!(consumed[&key_b], 7);
    }

    #[test]
    fn adjustment_reduces_both_quantities() {
        // 10 units from warehouse_quantity=100, reserved_quantity=20
        let key = some_key();
        let consumed = BTreeMap::from([(key, 10)]);
        let adjustments = calculate_inventory_adjustments(&[stock(key, 100, 20)], &consumed);

        assert_eq!(adjustments.len(), 1);
        let adjustment = &adjustments[0];
        assert_eq!(adjustment.previous_warehouse_quantity, 100);
        assert_eq!(adjustment.previous_reserved_quantity, 20);
        assert_eq!(adjustment.new_warehouse_quantity, 90);
        assert_eq!(adjustment.new_reserved_quantity, 10);
        assert_eq!(adjustment.status, StockStatus::InStock);
    }

    #[test]
    fn exact_depletion_goes_out_of_stock() {
        let key = some_key();
        let consumed = BTreeMap::from([(key, 100)]);
        let adjustments = calculate_inventory_adjustments(&[stock(key, 100, 100)], &consumed);

        let adjustment = &adjustments[0];
        assert_eq!(adjustment.new_warehouse_quantity, 0);
        assert_eq!(adjustment.new_reserved_quantity, 0);
        assert_eq!(adjustment.status, StockStatus::OutOfStock);
    }

    #[test]
    fn over_consumption_is_clamped_at_zero() {
        let key = some_key();
        let consumed = BTreeMap::from([(key, 150)]);
        let adjustments = calculate_inventory_adjustments(&[stock(key, 100, 30)], &consumed);

        let adjustment = &adjustments[0];
        assert_eq!(adjustment.new_warehouse_quantity, 0);
        assert_eq!(adjustment.new_reserved_quantity, 0);
        assert_eq!(adjustment.status, StockStatus::OutOfStock);
    }

    #[test]
    fn multiple_allocations_same_key_adjust_once() {
        let key = some_key();
        let allocations = vec![allocation(key, 10), allocation(key, 15)];
        let consumed = aggregate_consumed_by_key(&allocations);
        let adjustments = calculate_inventory_adjustments(&[stock(key, 100, 40)], &consumed);

        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].new_warehouse_quantity, 75);
        assert_eq!(adjustments[0].new_reserved_quantity, 15);
    }

    #[test]
    fn adjustments_iterate_in_key_order() {
        let mut keys = vec![some_key(), some_key(), some_key()];
        keys.sort();

        let rows: Vec<WarehouseStock> = keys.iter().map(|k| stock(*k, 50, 10)).collect();
        let consumed: BTreeMap<StockKey, i64> = keys.iter().map(|k| (*k, 5)).collect();

        let adjustments = calculate_inventory_adjustments(&rows, &consumed);
        let produced: Vec<StockKey> = adjustments.iter().map(|a| a.key).collect();
        assert_eq!(produced, keys);
    }
}
