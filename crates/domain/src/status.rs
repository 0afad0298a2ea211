//! Status machines and status-code constants.
//!
//! Fulfillment status follows a fixed total order:
//!
//! ```text
//! Pending ──► Picking ──► Packed ──► Shipped ──► Delivered
//!    │           │           │          │
//!    └───────────┴───────────┴──────────┴──► Cancelled
//! ```
//!
//! `Delivered` and `Cancelled` are terminal. Transitions may only move
//! strictly forward along the sequence; `Cancelled` is reachable from any
//! non-terminal state.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Status codes as stored in the pre-populated status catalog.
pub mod codes {
    // Orders and their items (items track the order in lock-step).
    pub const ORDER_PENDING: &str = "ORDER_PENDING";
    pub const ORDER_ALLOCATED: &str = "ORDER_ALLOCATED";
    pub const ORDER_FULFILLING: &str = "ORDER_FULFILLING";
    pub const ORDER_FULFILLED: &str = "ORDER_FULFILLED";
    pub const ORDER_CANCELLED: &str = "ORDER_CANCELLED";

    // Order items awaiting reservation; block fulfillment.
    pub const ITEM_PENDING_ALLOCATION: &str = "ITEM_PENDING_ALLOCATION";
    pub const ITEM_PARTIALLY_ALLOCATED: &str = "ITEM_PARTIALLY_ALLOCATED";

    // Inventory allocations.
    pub const ALLOCATION_OPEN: &str = "ALLOCATION_OPEN";
    pub const ALLOCATION_FULFILLED: &str = "ALLOCATION_FULFILLED";
    pub const ALLOCATION_CANCELLED: &str = "ALLOCATION_CANCELLED";

    // Outbound shipments.
    pub const SHIPMENT_INITIATED: &str = "SHIPMENT_INITIATED";
    pub const SHIPMENT_DISPATCHED: &str = "SHIPMENT_DISPATCHED";
    pub const SHIPMENT_DELIVERED: &str = "SHIPMENT_DELIVERED";
    pub const SHIPMENT_CANCELLED: &str = "SHIPMENT_CANCELLED";

    // Order fulfillments (see FulfillmentStatus).
    pub const FULFILLMENT_PENDING: &str = "FULFILLMENT_PENDING";
    pub const FULFILLMENT_PICKING: &str = "FULFILLMENT_PICKING";
    pub const FULFILLMENT_PACKED: &str = "FULFILLMENT_PACKED";
    pub const FULFILLMENT_SHIPPED: &str = "FULFILLMENT_SHIPPED";
    pub const FULFILLMENT_DELIVERED: &str = "FULFILLMENT_DELIVERED";
    pub const FULFILLMENT_CANCELLED: &str = "FULFILLMENT_CANCELLED";

    // Derived warehouse stock state.
    pub const IN_STOCK: &str = "IN_STOCK";
    pub const OUT_OF_STOCK: &str = "OUT_OF_STOCK";
}

/// The state of a fulfillment record in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FulfillmentStatus {
    /// Created, nothing picked yet.
    #[default]
    Pending,

    /// Stock is being picked from the warehouse.
    Picking,

    /// Picked and packed, awaiting dispatch.
    Packed,

    /// Handed to the carrier.
    Shipped,

    /// Confirmed received (terminal state).
    Delivered,

    /// Abandoned before delivery (terminal state).
    Cancelled,
}

impl FulfillmentStatus {
    /// Parses a catalog status code.
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            codes::FULFILLMENT_PENDING => Ok(FulfillmentStatus::Pending),
            codes::FULFILLMENT_PICKING => Ok(FulfillmentStatus::Picking),
            codes::FULFILLMENT_PACKED => Ok(FulfillmentStatus::Packed),
            codes::FULFILLMENT_SHIPPED => Ok(FulfillmentStatus::Shipped),
            codes::FULFILLMENT_DELIVERED => Ok(FulfillmentStatus::Delivered),
            codes::FULFILLMENT_CANCELLED => Ok(FulfillmentStatus::Cancelled),
            other => Err(DomainError::Validation(format!(
                "unrecognized fulfillment status code: {other}"
            ))),
        }
    }

    /// Returns the catalog status code for this state.
    pub fn as_code(&self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => codes::FULFILLMENT_PENDING,
            FulfillmentStatus::Picking => codes::FULFILLMENT_PICKING,
            FulfillmentStatus::Packed => codes::FULFILLMENT_PACKED,
            FulfillmentStatus::Shipped => codes::FULFILLMENT_SHIPPED,
            FulfillmentStatus::Delivered => codes::FULFILLMENT_DELIVERED,
            FulfillmentStatus::Cancelled => codes::FULFILLMENT_CANCELLED,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Delivered | FulfillmentStatus::Cancelled
        )
    }

    /// Position along the forward sequence; Cancelled has none.
    fn sequence(&self) -> Option<u8> {
        match self {
            FulfillmentStatus::Pending => Some(0),
            FulfillmentStatus::Picking => Some(1),
            FulfillmentStatus::Packed => Some(2),
            FulfillmentStatus::Shipped => Some(3),
            FulfillmentStatus::Delivered => Some(4),
            FulfillmentStatus::Cancelled => None,
        }
    }

    /// Returns true if this status may transition to `next`.
    pub fn can_transition_to(&self, next: FulfillmentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next.sequence() {
            // Cancelled is reachable from any non-terminal state.
            None => true,
            Some(to) => match self.sequence() {
                Some(from) => to > from,
                None => false,
            },
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Validates a requested fulfillment status transition between two catalog
/// codes.
///
/// Fails if either code is unrecognized, if the current status is terminal,
/// or if the transition does not strictly advance the sequence.
pub fn validate_fulfillment_status_transition(current_code: &str, next_code: &str) -> Result<()> {
    let current = FulfillmentStatus::from_code(current_code)?;
    let next = FulfillmentStatus::from_code(next_code)?;

    if !current.can_transition_to(next) {
        return Err(DomainError::Validation(format!(
            "illegal fulfillment status transition: {current_code} -> {next_code}"
        )));
    }
    Ok(())
}

/// Derived stock state of a warehouse inventory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockStatus {
    /// Warehouse quantity is above zero.
    InStock,
    /// Warehouse quantity has reached zero.
    OutOfStock,
}

impl StockStatus {
    /// Derives the stock state from a warehouse quantity.
    pub fn from_quantity(warehouse_quantity: i64) -> Self {
        if warehouse_quantity > 0 {
            StockStatus::InStock
        } else {
            StockStatus::OutOfStock
        }
    }

    /// Returns the catalog status code for this state.
    pub fn as_code(&self) -> &'static str {
        match self {
            StockStatus::InStock => codes::IN_STOCK,
            StockStatus::OutOfStock => codes::OUT_OF_STOCK,
        }
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use FulfillmentStatus::*;

    #[test]
    fn default_status_is_pending() {
        assert_eq!(FulfillmentStatus::default(), Pending);
    }

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(Pending.can_transition_to(Picking));
        assert!(Pending.can_transition_to(Shipped));
        assert!(Picking.can_transition_to(Packed));
        assert!(Packed.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
    }

    #[test]
    fn same_state_transitions_are_rejected() {
        for status in [Pending, Picking, Packed, Shipped] {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn backward_transitions_are_rejected() {
        assert!(!Picking.can_transition_to(Pending));
        assert!(!Packed.can_transition_to(Picking));
        assert!(!Shipped.can_transition_to(Packed));
    }

    #[test]
    fn cancelled_is_reachable_from_any_non_terminal_state() {
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Picking.can_transition_to(Cancelled));
        assert!(Packed.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states_allow_nothing() {
        for next in [Pending, Picking, Packed, Shipped, Delivered, Cancelled] {
            assert!(!Delivered.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn terminal_predicate() {
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Shipped.is_terminal());
    }

    #[test]
    fn code_roundtrip() {
        for status in [Pending, Picking, Packed, Shipped, Delivered, Cancelled] {
            assert_eq!(FulfillmentStatus::from_code(status.as_code()).unwrap(), status);
        }
    }

    #[test]
    fn validate_accepts_forward_codes() {
        assert!(
            validate_fulfillment_status_transition(
                codes::FULFILLMENT_PENDING,
                codes::FULFILLMENT_PICKING
            )
            .is_ok()
        );
        assert!(
            validate_fulfillment_status_transition(
                codes::FULFILLMENT_PACKED,
                codes::FULFILLMENT_DELIVERED
            )
            .is_ok()
        );
    }

    #[test]
    fn validate_rejects_delivered_to_shipped() {
        let err = validate_fulfillment_status_transition(
            codes::FULFILLMENT_DELIVERED,
            codes::FULFILLMENT_SHIPPED,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn validate_rejects_unknown_codes() {
        assert!(validate_fulfillment_status_transition("NOT_A_STATUS", codes::FULFILLMENT_PICKING).is_err());
        assert!(validate_fulfillment_status_transition(codes::FULFILLMENT_PENDING, "NOT_A_STATUS").is_err());
    }

    #[test]
    fn stock_status_derivation() {
        assert_eq!(StockStatus::from_quantity(1), StockStatus::InStock);
        assert_eq!(StockStatus::from_quantity(100), StockStatus::InStock);
        assert_eq!(StockStatus::from_quantity(0), StockStatus::OutOfStock);
    }
}
