//! Static table-to-primary-key configuration for every lockable table.
//!
//! Declared once at compile time; the locking primitives never consult the
//! database catalog.

use db_core::TableKey;

pub const ORDERS: TableKey = TableKey {
    table: "orders",
    key_columns: &["id"],
};

pub const ORDER_ITEMS: TableKey = TableKey {
    table: "order_items",
    key_columns: &["id"],
};

pub const INVENTORY_ALLOCATIONS: TableKey = TableKey {
    table: "inventory_allocations",
    key_columns: &["id"],
};

pub const WAREHOUSE_INVENTORY: TableKey = TableKey {
    table: "warehouse_inventory",
    key_columns: &["warehouse_id", "batch_id"],
};

pub const OUTBOUND_SHIPMENTS: TableKey = TableKey {
    table: "outbound_shipments",
    key_columns: &["id"],
};

pub const ORDER_FULFILLMENTS: TableKey = TableKey {
    table: "order_fulfillments",
    key_columns: &["id"],
};
