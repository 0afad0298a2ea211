//! The fulfillment engine: one transaction per fulfillment action.
//!
//! Control flow: validate -> lock allocations & inventory -> enforce single
//! warehouse -> build shipment/fulfillment records -> calculate adjustments
//! -> apply adjustments -> transition statuses -> persist audit logs. Every
//! step runs inside the same transaction; any failure rolls back all of it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use sqlx::{PgConnection, PgPool};

use common::{
    AllocationId, DeliveryMethodId, FulfillmentId, OrderId, ShipmentId, StatusId, UserId,
    WarehouseId,
};
use db_core::{RetryPolicy, with_retry};
use domain::{
    AllocationMeta, LogContext, NewOutboundShipment, StockAdjustment, StockKey, WarehouseStock,
    aggregate_consumed_by_key, assert_allocations_valid, build_fulfillment_inputs,
    build_shipment_batch_inputs, build_inventory_activity_logs, calculate_inventory_adjustments,
    codes, enrich_allocations, single_warehouse_id, validate_fulfillment_status_transition,
};

use crate::catalog::StatusCatalog;
use crate::error::{FulfillmentError, Result};
use crate::repo;
use crate::repo::shipments::FulfillmentRecord;

/// A fulfillment request: consume the order's reserved inventory and ship it.
#[derive(Debug, Clone)]
pub struct FulfillOrderRequest {
    pub order_id: OrderId,
    /// Restrict to a subset of the order's allocations, or consume all.
    pub allocation_ids: Option<Vec<AllocationId>>,
    pub delivery_method_id: Option<DeliveryMethodId>,
    pub notes: Option<String>,
    pub user_id: UserId,
    /// Inventory action type recorded on every audit row.
    pub action_type_id: i32,
    /// Target status code for the order and its items.
    pub order_status_code: String,
    /// Target status code for the consumed allocations, if they transition.
    pub allocation_status_code: Option<String>,
}

/// What one committed fulfillment produced.
#[derive(Debug)]
pub struct FulfillmentOutcome {
    pub shipment_id: ShipmentId,
    pub warehouse_id: WarehouseId,
    pub fulfillments: Vec<FulfillmentRecord>,
    pub adjustments: Vec<StockAdjustment>,
    pub logs_written: usize,
}

/// Allocation metadata with the locked stock backing it.
#[derive(Debug)]
pub struct LockedAllocations {
    pub allocations: Vec<AllocationMeta>,
    pub stock: Vec<WarehouseStock>,
    pub stock_keys: Vec<StockKey>,
}

/// One synchronized status transition across the five entity collections.
///
/// The order and its items always move; allocations, fulfillments, and
/// shipments move only when both their ids and a target status are supplied.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub order_status_id: StatusId,
    pub allocation_ids: Vec<AllocationId>,
    pub allocation_status_id: Option<StatusId>,
    pub fulfillment_ids: Vec<FulfillmentId>,
    pub fulfillment_status_id: Option<StatusId>,
    pub shipment_ids: Vec<ShipmentId>,
    pub shipment_status_id: Option<StatusId>,
}

/// Drives outbound fulfillment against a Postgres pool.
#[derive(Clone)]
pub struct FulfillmentEngine {
    pool: PgPool,
    catalog: Arc<StatusCatalog>,
    retry: RetryPolicy,
}

impl FulfillmentEngine {
    /// Creates an engine over the given pool and loaded status catalog.
    pub fn new(pool: PgPool, catalog: Arc<StatusCatalog>) -> Self {
        Self {
            pool,
            catalog,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy for transient connection failures.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Executes a full fulfillment in one transaction.
    ///
    /// The whole unit retries on transient connection failures; a retry
    /// re-runs the entire transaction, so no partial state can leak.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn fulfill_order(&self, request: FulfillOrderRequest) -> Result<FulfillmentOutcome> {
        metrics::counter!("fulfillment_executions_total").increment(1);
        let start = std::time::Instant::now();

        let result = with_retry(&self.retry, || self.run_fulfillment(request.clone())).await;

        let duration = start.elapsed().as_secs_f64();
        metrics::histogram!("fulfillment_duration_seconds").record(duration);
        match &result {
            Ok(outcome) => {
                metrics::counter!("fulfillment_completed").increment(1);
                tracing::info!(
                    shipment_id = %outcome.shipment_id,
                    warehouse_id = %outcome.warehouse_id,
                    fulfillments = outcome.fulfillments.len(),
                    adjustments = outcome.adjustments.len(),
                    logs = outcome.logs_written,
                    duration,
                    "fulfillment committed"
                );
            }
            Err(e) => {
                metrics::counter!("fulfillment_failed").increment(1);
                tracing::warn!(error = %e, duration, "fulfillment failed");
            }
        }

        result
    }

    async fn run_fulfillment(&self, request: FulfillOrderRequest) -> Result<FulfillmentOutcome> {
        // Resolve every status id up front; an unknown code must fail before
        // the transaction opens.
        let order_status_id = self.catalog.status_id(&request.order_status_code)?;
        let allocation_status_id = request
            .allocation_status_code
            .as_deref()
            .map(|code| self.catalog.status_id(code))
            .transpose()?;
        let shipment_initiated = self.catalog.status_id(codes::SHIPMENT_INITIATED)?;
        let fulfillment_pending = self.catalog.status_id(codes::FULFILLMENT_PENDING)?;
        let in_stock = self.catalog.status_id(codes::IN_STOCK)?;
        let out_of_stock = self.catalog.status_id(codes::OUT_OF_STOCK)?;
        let blocking_item_statuses = [
            self.catalog.status_id(codes::ITEM_PENDING_ALLOCATION)?,
            self.catalog.status_id(codes::ITEM_PARTIALLY_ALLOCATED)?,
        ];

        let mut tx = self.pool.begin().await?;

        // 1. Lock the order row and confirm it is fully allocated.
        let order = repo::orders::get_order_for_update(&mut tx, request.order_id).await?;
        repo::orders::ensure_fully_allocated(&mut tx, request.order_id, &blocking_item_statuses)
            .await?;

        // 2. Fetch allocations, validate them, and lock the backing stock.
        let locked = self
            .get_and_lock_allocations(
                &mut tx,
                request.order_id,
                request.allocation_ids.as_deref(),
            )
            .await?;

        // 3. All allocations must draw from one warehouse.
        let warehouse_id = single_warehouse_id(&locked.allocations)?;

        // 4. Shipment header plus its batch lines.
        let shipment = NewOutboundShipment::new(
            request.order_id,
            warehouse_id,
            request.delivery_method_id,
            request.notes.clone(),
            request.user_id,
        );
        repo::shipments::insert_outbound_shipment(&mut tx, &shipment, shipment_initiated).await?;

        let batch_lines = build_shipment_batch_inputs(
            &locked.allocations,
            shipment.shipment_id,
            request.notes.as_deref(),
            request.user_id,
        );
        repo::shipments::insert_shipment_batches(&mut tx, &batch_lines).await?;

        // 5. Aggregate allocations into per-item fulfillment rows.
        let fulfillment_inputs = build_fulfillment_inputs(
            &locked.allocations,
            shipment.shipment_id,
            request.user_id,
            request.notes.as_deref(),
        );
        repo::shipments::upsert_fulfillments(&mut tx, &fulfillment_inputs, fulfillment_pending)
            .await?;
        let fulfillments =
            repo::shipments::fetch_fulfillments_for_shipment(&mut tx, shipment.shipment_id)
                .await?;

        // 6. Compute and apply the stock adjustments.
        let enriched = enrich_allocations(&locked.allocations, &locked.stock)?;
        let consumed = aggregate_consumed_by_key(&locked.allocations);
        let adjustments = calculate_inventory_adjustments(&locked.stock, &consumed);
        if adjustments.is_empty() {
            return Err(FulfillmentError::Business(format!(
                "no inventory adjustments calculated for order {}",
                request.order_id
            )));
        }
        repo::inventory::apply_adjustments(&mut tx, &adjustments, in_stock, out_of_stock, request.user_id)
            .await?;

        // 7. Synchronized status transition across the entity collections.
        let allocation_ids: Vec<AllocationId> = locked
            .allocations
            .iter()
            .map(|a| a.allocation_id)
            .collect();
        self.apply_status_transition(
            &mut tx,
            request.order_id,
            request.user_id,
            &StatusTransition {
                order_status_id,
                allocation_ids,
                allocation_status_id,
                fulfillment_ids: Vec::new(),
                fulfillment_status_id: None,
                shipment_ids: Vec::new(),
                shipment_status_id: None,
            },
        )
        .await?;

        // 8. One checksummed audit row per consumed allocation.
        let fulfillment_by_item: HashMap<_, _> = fulfillments
            .iter()
            .map(|f| (f.order_item_id, f.fulfillment_id))
            .collect();
        let adjustments_by_key: BTreeMap<StockKey, StockAdjustment> = adjustments
            .iter()
            .map(|a| (a.key, a.clone()))
            .collect();
        let logs = build_inventory_activity_logs(
            &enriched,
            &adjustments_by_key,
            &LogContext {
                action_type_id: request.action_type_id,
                user_id: request.user_id,
                order_id: request.order_id,
                order_number: &order.order_number,
                shipment_id: shipment.shipment_id,
                fulfillment_by_item: &fulfillment_by_item,
                comments: request.notes.as_deref(),
            },
        )?;
        if logs.is_empty() {
            return Err(FulfillmentError::Business(format!(
                "no activity logs generated for order {}",
                request.order_id
            )));
        }
        let logs_written = repo::logs::insert_activity_logs(&mut tx, &logs).await?;

        tx.commit().await?;

        Ok(FulfillmentOutcome {
            shipment_id: shipment.shipment_id,
            warehouse_id,
            fulfillments,
            adjustments,
            logs_written: logs_written as usize,
        })
    }

    /// Fetches and validates the order's allocations, then locks the
    /// warehouse stock rows they draw from.
    ///
    /// Stock rows are locked in one batched statement, ordered by key, so
    /// concurrent fulfillments over overlapping stock serialize instead of
    /// deadlocking. Must be called inside an open transaction; the locks
    /// hold until it commits or rolls back.
    pub async fn get_and_lock_allocations(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        allocation_ids: Option<&[AllocationId]>,
    ) -> Result<LockedAllocations> {
        let allocations =
            repo::allocations::get_allocations_by_order_id(conn, order_id, allocation_ids).await?;
        assert_allocations_valid(&allocations)?;

        let stock_keys: Vec<StockKey> = allocations
            .iter()
            .map(|a| StockKey::new(a.warehouse_id, a.batch_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        repo::inventory::lock_stock_rows(conn, &stock_keys).await?;
        let stock = repo::inventory::fetch_stock_for_keys(conn, &stock_keys).await?;

        tracing::debug!(
            %order_id,
            allocations = allocations.len(),
            stock_rows = stock.len(),
            "allocations fetched and stock locked"
        );

        Ok(LockedAllocations {
            allocations,
            stock,
            stock_keys,
        })
    }

    /// Applies one target status across the entity collections, locking each
    /// collection before its bulk update.
    ///
    /// Runs in its own transaction. To transition inside an existing
    /// fulfillment transaction the engine uses
    /// [`FulfillmentEngine::apply_status_transition`] internally.
    pub async fn update_all_statuses(
        &self,
        order_id: OrderId,
        user_id: UserId,
        transition: &StatusTransition,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.apply_status_transition(&mut tx, order_id, user_id, transition)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_status_transition(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        user_id: UserId,
        transition: &StatusTransition,
    ) -> Result<()> {
        // Order first, then its items in lock-step. The order always moves.
        repo::orders::update_order_status(conn, order_id, transition.order_status_id, user_id)
            .await?;
        repo::orders::update_order_item_statuses_by_order_id(
            conn,
            order_id,
            transition.order_status_id,
            user_id,
        )
        .await?;

        // Allocations: lock, then bulk update.
        if let (Some(status_id), false) = (
            transition.allocation_status_id,
            transition.allocation_ids.is_empty(),
        ) {
            repo::allocations::lock_allocations(conn, &transition.allocation_ids).await?;
            repo::allocations::update_allocation_status(
                conn,
                status_id,
                user_id,
                &transition.allocation_ids,
            )
            .await?;
        }

        // Fulfillments: lock, guard every row's transition, then update.
        if let (Some(status_id), false) = (
            transition.fulfillment_status_id,
            transition.fulfillment_ids.is_empty(),
        ) {
            self.guarded_fulfillment_update(conn, status_id, user_id, &transition.fulfillment_ids)
                .await?;
        }

        // Shipments: lock, then bulk update.
        if let (Some(status_id), false) = (
            transition.shipment_status_id,
            transition.shipment_ids.is_empty(),
        ) {
            repo::shipments::lock_shipments(conn, &transition.shipment_ids).await?;
            repo::shipments::update_shipment_status(
                conn,
                status_id,
                user_id,
                &transition.shipment_ids,
            )
            .await?;
        }

        tracing::debug!(%order_id, "status transition applied");
        Ok(())
    }

    /// Transitions fulfillments to a new status, enforcing the forward-only
    /// transition guard per row.
    pub async fn update_fulfillment_statuses(
        &self,
        fulfillment_ids: &[FulfillmentId],
        target_code: &str,
        user_id: UserId,
    ) -> Result<u64> {
        let status_id = self.catalog.status_id(target_code)?;
        let mut tx = self.pool.begin().await?;
        let updated = self
            .guarded_fulfillment_update(&mut tx, status_id, user_id, fulfillment_ids)
            .await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn guarded_fulfillment_update(
        &self,
        conn: &mut PgConnection,
        status_id: StatusId,
        user_id: UserId,
        fulfillment_ids: &[FulfillmentId],
    ) -> Result<u64> {
        repo::shipments::lock_fulfillments(conn, fulfillment_ids).await?;

        let target_code = self.catalog.code(status_id)?.to_string();
        let current = repo::shipments::fetch_fulfillment_statuses(conn, fulfillment_ids).await?;
        for (fulfillment_id, current_status) in &current {
            let current_code = self.catalog.code(*current_status)?;
            validate_fulfillment_status_transition(current_code, &target_code).map_err(|e| {
                FulfillmentError::Validation(format!("fulfillment {fulfillment_id}: {e}"))
            })?;
        }

        let updated =
            repo::shipments::update_fulfillment_status(conn, status_id, user_id, fulfillment_ids)
                .await?;
        Ok(updated)
    }

    /// Records carrier hand-off for a shipment: dispatched status, tracking
    /// number, shipped-at timestamp.
    pub async fn dispatch_shipment(
        &self,
        shipment_id: ShipmentId,
        tracking_number: &str,
        user_id: UserId,
    ) -> Result<()> {
        let dispatched = self.catalog.status_id(codes::SHIPMENT_DISPATCHED)?;

        let mut tx = self.pool.begin().await?;
        repo::shipments::lock_shipments(&mut tx, &[shipment_id]).await?;
        let updated = repo::shipments::mark_shipment_dispatched(
            &mut tx,
            shipment_id,
            dispatched,
            tracking_number,
            user_id,
        )
        .await?;
        if updated == 0 {
            return Err(FulfillmentError::NotFound(format!(
                "shipment not found: {shipment_id}"
            )));
        }
        tx.commit().await?;

        tracing::info!(%shipment_id, tracking_number, "shipment dispatched");
        Ok(())
    }
}
