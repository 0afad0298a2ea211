pub mod types;

pub use types::{
    AllocationId, BatchId, DeliveryMethodId, FulfillmentId, OrderId, OrderItemId, ShipmentId,
    StatusId, UserId, WarehouseId,
};
