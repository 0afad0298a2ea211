//! Identifier types shared across the fulfillment engine.
//!
//! Every entity gets its own UUID newtype so that an allocation id can never
//! be passed where a shipment id is expected. Status identifiers are small
//! integers keyed to the pre-populated status catalog.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random order ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an order ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OrderId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<OrderId> for Uuid {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

/// Unique identifier for a single line item on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderItemId(Uuid);

impl OrderItemId {
    /// Creates a new random order item ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an order item ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for OrderItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OrderItemId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<OrderItemId> for Uuid {
    fn from(id: OrderItemId) -> Self {
        id.0
    }
}

/// Unique identifier for an inventory allocation (a reservation of stock
/// against one order item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(Uuid);

impl AllocationId {
    /// Creates a new random allocation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an allocation ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if this is the nil UUID (an unset reference).
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for AllocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AllocationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AllocationId> for Uuid {
    fn from(id: AllocationId) -> Self {
        id.0
    }
}

/// Unique identifier for a warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(Uuid);

impl WarehouseId {
    /// Creates a new random warehouse ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a warehouse ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if this is the nil UUID (an unset reference).
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for WarehouseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WarehouseId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<WarehouseId> for Uuid {
    fn from(id: WarehouseId) -> Self {
        id.0
    }
}

/// Unique identifier for a lot-trackable batch of stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Creates a new random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a batch ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if this is the nil UUID (an unset reference).
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for BatchId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<BatchId> for Uuid {
    fn from(id: BatchId) -> Self {
        id.0
    }
}

/// Unique identifier for an outbound shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(Uuid);

impl ShipmentId {
    /// Creates a new random shipment ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a shipment ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ShipmentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ShipmentId> for Uuid {
    fn from(id: ShipmentId) -> Self {
        id.0
    }
}

/// Unique identifier for an order fulfillment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FulfillmentId(Uuid);

impl FulfillmentId {
    /// Creates a new random fulfillment ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a fulfillment ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for FulfillmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for FulfillmentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<FulfillmentId> for Uuid {
    fn from(id: FulfillmentId) -> Self {
        id.0
    }
}

/// Unique identifier for the user performing a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random user ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a user ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<UserId> for Uuid {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Unique identifier for a delivery method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryMethodId(Uuid);

impl DeliveryMethodId {
    /// Creates a delivery method ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DeliveryMethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryMethodId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<DeliveryMethodId> for Uuid {
    fn from(id: DeliveryMethodId) -> Self {
        id.0
    }
}

/// Internal identifier for a status catalog entry.
///
/// Statuses live in a small pre-populated table keyed by a serial integer;
/// human-readable codes map to these through the status catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(i32);

impl StatusId {
    /// Creates a status ID from a raw catalog value.
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw catalog value.
    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for StatusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for StatusId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<StatusId> for i32 {
    fn from(id: StatusId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_new_creates_unique_ids() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn allocation_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = AllocationId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn nil_detection() {
        assert!(WarehouseId::from_uuid(Uuid::nil()).is_nil());
        assert!(!WarehouseId::new().is_nil());
        assert!(BatchId::from_uuid(Uuid::nil()).is_nil());
        assert!(AllocationId::from_uuid(Uuid::nil()).is_nil());
    }

    #[test]
    fn status_id_roundtrip() {
        let id = StatusId::new(7);
        assert_eq!(id.as_i32(), 7);
        assert_eq!(i32::from(id), 7);
        assert_eq!(StatusId::from(7), id);
    }

    #[test]
    fn id_serialization_is_transparent() {
        let id = ShipmentId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: ShipmentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
        // transparent: serializes as a bare UUID string
        assert!(json.starts_with('"'));
    }

    #[test]
    fn display_matches_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(OrderId::from_uuid(uuid).to_string(), uuid.to_string());
    }
}
