//! Outbound fulfillment engine.
//!
//! Consumes reserved warehouse inventory to satisfy an order while keeping
//! orders, order items, allocations, shipments, and fulfillments
//! numerically consistent under concurrent access. Concurrency safety comes
//! entirely from database row locks: every fulfillment runs in one ACID
//! transaction that locks the touched warehouse inventory rows up front and
//! rolls back wholesale on any failure.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod repo;
pub mod tables;

pub use catalog::StatusCatalog;
pub use engine::{
    FulfillOrderRequest, FulfillmentEngine, FulfillmentOutcome, LockedAllocations,
    StatusTransition,
};
pub use error::{FulfillmentError, Result};
