//! PurchaseLedger - purchase records and cost allocation
//!
//! # Completion
//!
//! ```text
//! validate → load purchase → unit price = total / quantity
//!   → price every snapshot line (purchase_id marks it bought)
//!   → recalculate each contributing order
//!   → append a PURCHASE price fact
//!   → conservation check → status COMPLETED | PARTIAL → commit
//! ```
//!
//! Everything between `begin` and `commit` is one transaction; any failure,
//! including the conservation check, rolls all of it back.
//!
//! A line belongs to at most one purchase. Claiming re-checks that every
//! snapshot line is still unbought, allocation refuses lines owned by another
//! purchase, and cancelling hands the lines back as open demand.

use rust_decimal::Decimal;
use shared::models::{
    ConsolidatedLot, LotFilter, OrdersSnapshot, PriceHistoryCreate, PriceType, PurchaseComplete,
    PurchaseRecord, PurchaseStatus,
};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeSet;

use super::consolidation::{self, ConsolidationEngine};
use super::purchase_entry::CompletePurchase;
use crate::core::error::{PurchasingError, PurchasingResult};
use crate::db::repository::purchase::{NewPurchase, PurchaseOutcome};
use crate::db::repository::{RepoError, order, order_item, purchase};
use crate::db::{RetryPolicy, with_busy_retry};
use crate::orders::{aggregator, money, store::MAX_PAGE_SIZE};
use crate::pricing::history;
use crate::services::{SharedClock, SharedNotifier, notify_quietly};

/// `source` of price facts written by completions
pub const PRICE_SOURCE_PURCHASE: &str = "purchase";

async fn load_purchase(
    conn: &mut SqliteConnection,
    purchase_id: i64,
) -> PurchasingResult<PurchaseRecord> {
    purchase::find_by_id(conn, purchase_id)
        .await?
        .ok_or(PurchasingError::PurchaseNotFound(purchase_id))
}

/// Every snapshot line must still be unbought on an order that accepts
/// allocation; a lot computed before another purchase completed fails here.
async fn ensure_lines_open(
    conn: &mut SqliteConnection,
    lot_id: &str,
    snapshot: &OrdersSnapshot,
) -> PurchasingResult<()> {
    let wanted: BTreeSet<(i64, i64)> = snapshot
        .entries
        .iter()
        .flat_map(|e| e.items.iter().map(move |item| (item.item_id, e.order_id)))
        .collect();
    let item_ids: Vec<i64> = wanted.iter().map(|(item_id, _)| *item_id).collect();
    let open: BTreeSet<(i64, i64)> = order_item::find_unbought(conn, &item_ids)
        .await?
        .into_iter()
        .filter(|line| line.status.accepts_allocation())
        .map(|line| (line.item_id, line.order_id))
        .collect();

    if open != wanted {
        tracing::warn!(
            lot_id,
            lines = wanted.len(),
            open = open.len(),
            "Refusing claim on stale lot"
        );
        return Err(PurchasingError::StaleLot(lot_id.to_string()));
    }
    Ok(())
}

/// Insert a pending purchase for `lot` unless the lot is already held or
/// its lines are no longer open
async fn claim_on(
    conn: &mut SqliteConnection,
    lot: &ConsolidatedLot,
    buyer_id: i64,
    now: i64,
) -> PurchasingResult<PurchaseRecord> {
    if let Some(active) = purchase::find_active_by_lot(conn, &lot.lot_id).await? {
        return Err(PurchasingError::LotAlreadyClaimed {
            lot_id: lot.lot_id.clone(),
            purchase_id: Some(active.id),
        });
    }

    let snapshot = lot.snapshot();
    ensure_lines_open(conn, &lot.lot_id, &snapshot).await?;
    let id = purchase::insert(
        conn,
        NewPurchase {
            lot_id: &lot.lot_id,
            product_name: &lot.product_name,
            unit: &lot.unit,
            buyer_id,
            required_quantity: lot.total_quantity,
            orders_data: &snapshot,
        },
        now,
    )
    .await
    .map_err(|e| match e {
        // lost the race to a concurrent claim
        RepoError::Duplicate(_) => PurchasingError::LotAlreadyClaimed {
            lot_id: lot.lot_id.clone(),
            purchase_id: None,
        },
        other => other.into(),
    })?;

    load_purchase(conn, id).await
}

fn validate_lot(lot: &ConsolidatedLot) -> PurchasingResult<()> {
    if lot.shares.is_empty() || lot.total_quantity <= 0.0 {
        return Err(PurchasingError::Validation(format!(
            "Lot {} has no open demand",
            lot.lot_id
        )));
    }
    Ok(())
}

/// Σ allocated must match unit price × Σ snapshot quantity within one cent
/// per line
fn check_conservation(
    purchase_id: i64,
    snapshot: &OrdersSnapshot,
    unit_price: Decimal,
    allocated_lines: i64,
    allocated: f64,
) -> PurchasingResult<()> {
    let lines = snapshot.line_count();
    let snapshot_quantity: Decimal = snapshot
        .entries
        .iter()
        .flat_map(|e| e.items.iter())
        .map(|item| money::to_decimal(item.quantity))
        .sum();
    let expected = unit_price * snapshot_quantity;
    let tolerance = money::MONEY_TOLERANCE * Decimal::from(lines.max(1));
    let diff = (money::to_decimal(allocated) - expected).abs();

    if allocated_lines != lines as i64 || diff > tolerance {
        let expected = money::to_f64(expected);
        tracing::error!(
            purchase_id,
            allocated,
            expected,
            lines,
            allocated_lines,
            "Allocation conservation check failed, rolling back"
        );
        return Err(PurchasingError::Consistency {
            purchase_id,
            allocated,
            expected,
            lines,
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct PurchaseLedger {
    pool: SqlitePool,
    clock: SharedClock,
    notifier: SharedNotifier,
    consolidation: ConsolidationEngine,
    retry: RetryPolicy,
}

impl PurchaseLedger {
    pub fn new(
        pool: SqlitePool,
        clock: SharedClock,
        notifier: SharedNotifier,
        consolidation: ConsolidationEngine,
    ) -> Self {
        Self {
            pool,
            clock,
            notifier,
            consolidation,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ========== Claiming ==========

    /// Claim an already computed lot
    pub async fn create_from_lot(
        &self,
        lot: &ConsolidatedLot,
        buyer_id: i64,
    ) -> PurchasingResult<PurchaseRecord> {
        validate_lot(lot)?;
        let record = with_busy_retry(&self.retry, "create_purchase", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;
            let record = claim_on(&mut tx, lot, buyer_id, now).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await?;

        self.log_created(&record);
        Ok(record)
    }

    /// Re-derive the lot and claim it in one transaction
    pub async fn create_purchase_from_lot(
        &self,
        lot_id: &str,
        buyer_id: i64,
        filter: Option<LotFilter>,
    ) -> PurchasingResult<PurchaseRecord> {
        let filter = self.consolidation.resolve_filter(filter);
        let filter = &filter;
        let record = with_busy_retry(&self.retry, "create_purchase", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;

            let lot = consolidation::lots_on(&mut tx, filter)
                .await?
                .into_iter()
                .find(|lot| lot.lot_id == lot_id);
            let lot = match lot {
                Some(lot) => lot,
                None => {
                    // an active purchase explains why the lot is gone
                    if let Some(active) = purchase::find_active_by_lot(&mut tx, lot_id).await? {
                        return Err(PurchasingError::LotAlreadyClaimed {
                            lot_id: lot_id.to_string(),
                            purchase_id: Some(active.id),
                        });
                    }
                    return Err(PurchasingError::LotNotFound(lot_id.to_string()));
                }
            };
            validate_lot(&lot)?;

            let record = claim_on(&mut tx, &lot, buyer_id, now).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await?;

        self.log_created(&record);
        Ok(record)
    }

    fn log_created(&self, record: &PurchaseRecord) {
        tracing::info!(
            purchase_id = record.id,
            lot_id = %record.lot_id,
            buyer_id = record.buyer_id,
            required_quantity = record.required_quantity,
            orders = record.orders_data.entries.len(),
            "Purchase created"
        );
    }

    // ========== Completion ==========

    /// Record what was bought and allocate the realized unit cost to every
    /// snapshot line. A shortfall leaves the purchase PARTIAL; completing it
    /// again with cumulative figures re-allocates.
    pub async fn complete(
        &self,
        purchase_id: i64,
        data: PurchaseComplete,
    ) -> PurchasingResult<PurchaseRecord> {
        money::validate_quantity(data.actual_quantity, "actual_quantity")?;
        money::validate_amount(data.actual_total_price, "actual_total_price")?;
        let unit_price = money::unit_price(data.actual_total_price, data.actual_quantity)
            .ok_or_else(|| {
                PurchasingError::Validation("actual_quantity must be positive".into())
            })?;
        let notes = data
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let data = &data;

        let record = with_busy_retry(&self.retry, "complete_purchase", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;
            let record =
                complete_on(&mut tx, purchase_id, data, unit_price, notes, now).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await?;

        tracing::info!(
            purchase_id,
            lot_id = %record.lot_id,
            status = %record.status,
            actual_quantity = data.actual_quantity,
            actual_total_price = data.actual_total_price,
            unit_price = ?record.unit_price,
            "Purchase completed"
        );
        let message = format!(
            "Purchase #{} ({}) is {}: {} {} for {:.2}, unit price {:.4}",
            record.id,
            record.product_name,
            record.status,
            data.actual_quantity,
            record.unit,
            data.actual_total_price,
            record.unit_price.unwrap_or_default()
        );
        notify_quietly(self.notifier.as_ref(), record.buyer_id, &message).await;
        Ok(record)
    }

    /// Execute a confirmed purchase entry
    pub async fn submit(&self, command: CompletePurchase) -> PurchasingResult<PurchaseRecord> {
        let (purchase_id, data) = command.into_parts();
        self.complete(purchase_id, data).await
    }

    // ========== Cancellation ==========

    /// Cancel a pending or partial purchase. Lines priced by a partial
    /// completion are un-bought (price and total cleared) and their orders
    /// recalculated, so the lot can be claimed again. Price facts stay.
    pub async fn cancel(&self, purchase_id: i64) -> PurchasingResult<PurchaseRecord> {
        let outcome = with_busy_retry(&self.retry, "cancel_purchase", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;

            let record = load_purchase(&mut tx, purchase_id).await?;
            if !record.status.is_active() {
                return Err(PurchasingError::InvalidPurchaseTransition {
                    purchase_id,
                    status: record.status,
                    action: "cancel",
                });
            }
            purchase::cancel(&mut tx, purchase_id, now).await?;

            let released = order_item::release(&mut tx, purchase_id).await?;
            if released > 0 {
                for order_id in record.orders_data.order_ids() {
                    aggregator::recalculate(&mut tx, order_id, now).await?;
                }
            }

            let record = load_purchase(&mut tx, purchase_id).await?;
            tx.commit().await?;
            Ok((record, released))
        })
        .await?;
        let (record, released) = outcome;

        tracing::info!(
            purchase_id,
            lot_id = %record.lot_id,
            released_lines = released,
            "Purchase cancelled"
        );
        Ok(record)
    }

    // ========== Queries ==========

    pub async fn get_by_id(&self, purchase_id: i64) -> PurchasingResult<PurchaseRecord> {
        let mut conn = self.pool.acquire().await?;
        load_purchase(&mut conn, purchase_id).await
    }

    pub async fn list(
        &self,
        status: Option<PurchaseStatus>,
        limit: i64,
        offset: i64,
    ) -> PurchasingResult<Vec<PurchaseRecord>> {
        let mut conn = self.pool.acquire().await?;
        let records =
            purchase::find_all(&mut conn, status, limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
                .await?;
        Ok(records)
    }

    pub async fn find_active_by_lot(&self, lot_id: &str) -> PurchasingResult<Option<PurchaseRecord>> {
        let mut conn = self.pool.acquire().await?;
        Ok(purchase::find_active_by_lot(&mut conn, lot_id).await?)
    }
}

async fn complete_on(
    conn: &mut SqliteConnection,
    purchase_id: i64,
    data: &PurchaseComplete,
    unit_price: Decimal,
    notes: Option<&str>,
    now: i64,
) -> PurchasingResult<PurchaseRecord> {
    let record = load_purchase(conn, purchase_id).await?;
    if !record.status.is_active() {
        return Err(PurchasingError::InvalidPurchaseTransition {
            purchase_id,
            status: record.status,
            action: "complete",
        });
    }

    let unit_price_stored = money::price_to_f64(unit_price);
    let mut touched_orders = BTreeSet::new();

    for entry in &record.orders_data.entries {
        let order = order::find_by_id(conn, entry.order_id)
            .await?
            .ok_or(PurchasingError::OrderNotFound(entry.order_id))?;
        if !order.status.accepts_allocation() {
            return Err(PurchasingError::OrderNotAllocatable {
                order_id: order.id,
                status: order.status,
            });
        }

        for item in &entry.items {
            // from the exact unit price, so Σ totals matches the amount paid
            let total = money::to_f64(unit_price * money::to_decimal(item.quantity));
            order_item::allocate(
                conn,
                item.item_id,
                entry.order_id,
                unit_price_stored,
                total,
                purchase_id,
            )
            .await
            .map_err(|e| match e {
                RepoError::NotFound(_) => PurchasingError::ItemNotFound(item.item_id),
                RepoError::Duplicate(_) => PurchasingError::LineAlreadyPurchased {
                    item_id: item.item_id,
                },
                other => other.into(),
            })?;
        }
        touched_orders.insert(entry.order_id);
    }

    for order_id in &touched_orders {
        aggregator::recalculate(conn, *order_id, now).await?;
    }

    history::record_on(
        conn,
        &PriceHistoryCreate {
            product_name: record.product_name.clone(),
            unit: record.unit.clone(),
            price_type: PriceType::Purchase,
            price: unit_price_stored,
            source: PRICE_SOURCE_PURCHASE.to_string(),
            source_id: Some(purchase_id),
            effective_date: Some(now),
        },
        now,
    )
    .await?;

    let (allocated_lines, allocated) = order_item::sum_allocated(conn, purchase_id).await?;
    check_conservation(
        purchase_id,
        &record.orders_data,
        unit_price,
        allocated_lines,
        allocated,
    )?;

    let status = if money::to_decimal(data.actual_quantity)
        < money::to_decimal(record.required_quantity)
    {
        PurchaseStatus::Partial
    } else {
        PurchaseStatus::Completed
    };
    purchase::complete(
        conn,
        purchase_id,
        PurchaseOutcome {
            purchased_quantity: data.actual_quantity,
            total_price: money::to_f64(money::to_decimal(data.actual_total_price)),
            unit_price: unit_price_stored,
            status,
            notes,
        },
        now,
    )
    .await?;

    load_purchase(conn, purchase_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::db::open_in_memory;
    use crate::orders::OrderStore;
    use crate::services::{ManualClock, RecordingNotifier};
    use shared::models::{
        OrderCreate, OrderDetail, OrderLineInput, OrderStatus, SnapshotEntry, SnapshotItem,
    };
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    struct Harness {
        pool: SqlitePool,
        orders: OrderStore,
        engine: ConsolidationEngine,
        ledger: PurchaseLedger,
        notifier: RecordingNotifier,
    }

    async fn harness() -> Harness {
        let pool = open_in_memory().await.unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(NOW));
        let notifier = RecordingNotifier::new();
        let shared_notifier: SharedNotifier = Arc::new(notifier.clone());
        let engine = ConsolidationEngine::new(pool.clone(), clock.clone());
        Harness {
            orders: OrderStore::new(pool.clone(), clock.clone(), shared_notifier.clone()),
            ledger: PurchaseLedger::new(pool.clone(), clock, shared_notifier, engine.clone()),
            engine,
            pool,
            notifier,
        }
    }

    async fn sent_order(h: &Harness, restaurant_id: i64, lines: &[(&str, f64)]) -> OrderDetail {
        let detail = h
            .orders
            .create_order(OrderCreate {
                restaurant_id,
                created_by: restaurant_id * 100,
                items: lines
                    .iter()
                    .map(|(name, quantity)| OrderLineInput {
                        product_name: name.to_string(),
                        unit: "kg".into(),
                        quantity: *quantity,
                        price: None,
                    })
                    .collect(),
                manager_comment: None,
            })
            .await
            .unwrap();
        h.orders
            .update_status(detail.order.id, OrderStatus::Sent, restaurant_id * 100, None)
            .await
            .unwrap();
        h.orders.get_order_by_id(detail.order.id).await.unwrap()
    }

    async fn potato_lot(h: &Harness) -> ConsolidatedLot {
        h.engine
            .get_consolidated_lots(None)
            .await
            .unwrap()
            .into_iter()
            .find(|lot| lot.product_name == "Potato")
            .unwrap()
    }

    fn completion(quantity: f64, total: f64) -> PurchaseComplete {
        PurchaseComplete {
            actual_quantity: quantity,
            actual_total_price: total,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_full_allocation() {
        let h = harness().await;
        let a = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let b = sent_order(&h, 2, &[("Potato", 80.0)]).await;

        let lot = potato_lot(&h).await;
        assert_eq!(lot.total_quantity, 180.0);
        let record = h
            .ledger
            .create_purchase_from_lot(&lot.lot_id, 9, None)
            .await
            .unwrap();
        assert_eq!(record.status, PurchaseStatus::Pending);
        assert_eq!(record.required_quantity, 180.0);

        let record = h
            .ledger
            .complete(record.id, completion(180.0, 6300.0))
            .await
            .unwrap();
        assert_eq!(record.status, PurchaseStatus::Completed);
        assert_eq!(record.unit_price, Some(35.0));
        assert!(record.completed_at.is_some());

        let a = h.orders.get_order_by_id(a.order.id).await.unwrap();
        let b = h.orders.get_order_by_id(b.order.id).await.unwrap();
        assert_eq!(a.items[0].price, Some(35.0));
        assert_eq!(a.items[0].total, Some(3500.0));
        assert_eq!(a.items[0].purchase_id, Some(record.id));
        assert_eq!(a.order.total_amount, 3500.0);
        assert_eq!(b.order.total_amount, 2800.0);

        // lot is gone from open demand
        assert!(h.engine.find_lot(&lot.lot_id, None).await.unwrap().is_none());
        // buyer is told
        assert_eq!(h.notifier.sent_to(9).len(), 1);

        let latest = history::recent_purchase_average(
            &mut h.pool.acquire().await.unwrap(),
            "potato",
            "kg",
            5,
        )
        .await
        .unwrap();
        assert_eq!(latest, Some(35.0));
    }

    #[tokio::test]
    async fn test_duplicate_claim_conflicts() {
        let h = harness().await;
        sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let lot = potato_lot(&h).await;

        let first = h.ledger.create_from_lot(&lot, 9).await.unwrap();
        let err = h.ledger.create_from_lot(&lot, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(matches!(
            err,
            PurchasingError::LotAlreadyClaimed { purchase_id: Some(id), .. } if id == first.id
        ));

        let err = h
            .ledger
            .create_purchase_from_lot(&lot.lot_id, 10, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.ledger.list(None, 50, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let h = harness().await;
        sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let lot = potato_lot(&h).await;

        let (a, b) = tokio::join!(
            h.ledger.create_purchase_from_lot(&lot.lot_id, 1, None),
            h.ledger.create_purchase_from_lot(&lot.lot_id, 2, None)
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let err = a.err().or(b.err()).unwrap();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_unknown_lot() {
        let h = harness().await;
        let err = h
            .ledger
            .create_purchase_from_lot("000000000000", 9, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchasingError::LotNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_completion_changes_nothing() {
        let h = harness().await;
        let order = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let lot = potato_lot(&h).await;
        let record = h.ledger.create_from_lot(&lot, 9).await.unwrap();

        for bad in [
            completion(0.0, 100.0),
            completion(-1.0, 100.0),
            completion(f64::NAN, 100.0),
            completion(10.0, -5.0),
            completion(10.0, f64::INFINITY),
        ] {
            let err = h.ledger.complete(record.id, bad).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        let unchanged = h.ledger.get_by_id(record.id).await.unwrap();
        assert_eq!(unchanged, record);
        let order = h.orders.get_order_by_id(order.order.id).await.unwrap();
        assert_eq!(order.items[0].price, None);
        assert_eq!(order.order.total_amount, 0.0);
        let mut conn = h.pool.acquire().await.unwrap();
        let recorded = history::recent_purchase_average(&mut conn, "potato", "kg", 5)
            .await
            .unwrap();
        assert_eq!(recorded, None);
    }

    #[tokio::test]
    async fn test_shortfall_is_partial_and_recompletable() {
        let h = harness().await;
        let a = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        sent_order(&h, 2, &[("Potato", 80.0)]).await;
        let lot = potato_lot(&h).await;
        let record = h.ledger.create_from_lot(&lot, 9).await.unwrap();

        let record = h
            .ledger
            .complete(record.id, completion(150.0, 5400.0))
            .await
            .unwrap();
        assert_eq!(record.status, PurchaseStatus::Partial);
        assert_eq!(record.unit_price, Some(36.0));
        assert_eq!(record.completed_at, None);
        // allocation still uses snapshot quantities
        let order = h.orders.get_order_by_id(a.order.id).await.unwrap();
        assert_eq!(order.order.total_amount, 3600.0);

        let record = h
            .ledger
            .complete(record.id, completion(180.0, 6300.0))
            .await
            .unwrap();
        assert_eq!(record.status, PurchaseStatus::Completed);
        let order = h.orders.get_order_by_id(a.order.id).await.unwrap();
        assert_eq!(order.order.total_amount, 3500.0);

        let err = h
            .ledger
            .complete(record.id, completion(180.0, 6300.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn test_submit_entry_flow() {
        use crate::purchasing::purchase_entry::{EntryTarget, PurchaseEntryInput, apply};

        let h = harness().await;
        sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let lot = potato_lot(&h).await;
        let record = h.ledger.create_from_lot(&lot, 9).await.unwrap();

        let target = EntryTarget::try_from(&record).unwrap();
        let state = [
            PurchaseEntryInput::Select { target },
            PurchaseEntryInput::EnterQuantity { quantity: 100.0 },
            PurchaseEntryInput::EnterTotal {
                total: 3500.0,
                notes: None,
            },
            PurchaseEntryInput::Confirm,
        ]
        .into_iter()
        .try_fold(Default::default(), apply)
        .unwrap();

        let command = state.command().cloned().unwrap();
        let record = h.ledger.submit(command).await.unwrap();
        assert_eq!(record.status, PurchaseStatus::Completed);
        assert_eq!(record.unit_price, Some(35.0));
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let h = harness().await;
        let order = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let lot = potato_lot(&h).await;

        let record = h.ledger.create_from_lot(&lot, 9).await.unwrap();
        let cancelled = h.ledger.cancel(record.id).await.unwrap();
        assert_eq!(cancelled.status, PurchaseStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert!(h.ledger.find_active_by_lot(&lot.lot_id).await.unwrap().is_none());
        let err = h.ledger.cancel(record.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        // lot can be claimed again, partially completed, then cancelled
        let record = h.ledger.create_from_lot(&lot, 9).await.unwrap();
        h.ledger
            .complete(record.id, completion(50.0, 1750.0))
            .await
            .unwrap();
        let order_id = order.order.id;
        assert_eq!(
            h.orders.get_order_by_id(order_id).await.unwrap().order.total_amount,
            3500.0
        );
        h.ledger.cancel(record.id).await.unwrap();

        // partial allocation is handed back as open demand
        let order = h.orders.get_order_by_id(order_id).await.unwrap();
        assert_eq!(order.items[0].price, None);
        assert_eq!(order.items[0].total, None);
        assert_eq!(order.items[0].purchase_id, None);
        assert_eq!(order.order.total_amount, 0.0);

        assert!(matches!(
            h.ledger.cancel(record.id + 100).await,
            Err(PurchasingError::PurchaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_order_blocks_allocation() {
        let h = harness().await;
        let order = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let lot = potato_lot(&h).await;
        let record = h.ledger.create_from_lot(&lot, 9).await.unwrap();

        h.orders
            .update_status(order.order.id, OrderStatus::Cancelled, 100, None)
            .await
            .unwrap();
        let err = h
            .ledger
            .complete(record.id, completion(100.0, 3500.0))
            .await
            .unwrap_err();
        assert!(matches!(err, PurchasingError::OrderNotAllocatable { .. }));
        assert_eq!(
            h.ledger.get_by_id(record.id).await.unwrap().status,
            PurchaseStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_conservation_failure_rolls_back() {
        let h = harness().await;
        let order = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let item_id = order.items[0].id;

        // a corrupt snapshot listing the same line twice
        let snapshot = OrdersSnapshot::new(vec![SnapshotEntry {
            order_id: order.order.id,
            restaurant_id: 1,
            quantity: 200.0,
            items: vec![
                SnapshotItem {
                    item_id,
                    quantity: 100.0,
                },
                SnapshotItem {
                    item_id,
                    quantity: 100.0,
                },
            ],
        }]);
        let id = {
            let mut conn = h.pool.acquire().await.unwrap();
            purchase::insert(
                &mut conn,
                NewPurchase {
                    lot_id: "corrupt00000",
                    product_name: "Potato",
                    unit: "kg",
                    buyer_id: 9,
                    required_quantity: 200.0,
                    orders_data: &snapshot,
                },
                NOW,
            )
            .await
            .unwrap()
        };

        let err = h
            .ledger
            .complete(id, completion(200.0, 7000.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Consistency);

        let order = h.orders.get_order_by_id(order.order.id).await.unwrap();
        assert_eq!(order.items[0].price, None);
        assert_eq!(order.items[0].purchase_id, None);
        assert_eq!(
            h.ledger.get_by_id(id).await.unwrap().status,
            PurchaseStatus::Pending
        );
        // the price fact written before the check is gone too
        let mut conn = h.pool.acquire().await.unwrap();
        let recorded = history::recent_purchase_average(&mut conn, "potato", "kg", 5)
            .await
            .unwrap();
        assert_eq!(recorded, None);
    }

    #[tokio::test]
    async fn test_thirds_allocation_within_tolerance() {
        let h = harness().await;
        for restaurant in 1..=3 {
            sent_order(&h, restaurant, &[("Potato", 1.0)]).await;
        }
        let lot = potato_lot(&h).await;
        let record = h.ledger.create_from_lot(&lot, 9).await.unwrap();
        let record = h
            .ledger
            .complete(record.id, completion(3.0, 100.0))
            .await
            .unwrap();
        assert_eq!(record.unit_price, Some(33.3333));

        let orders = h
            .orders
            .list_orders(&Default::default(), 50, 0)
            .await
            .unwrap();
        let sum: f64 = orders.iter().map(|o| o.total_amount).sum();
        assert!((sum - 100.0).abs() <= 0.03 + 1e-9);
    }

    #[tokio::test]
    async fn test_reclaim_after_partial_cancel() {
        let h = harness().await;
        let a = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        sent_order(&h, 2, &[("Potato", 80.0)]).await;
        let lot = potato_lot(&h).await;

        let first = h
            .ledger
            .create_purchase_from_lot(&lot.lot_id, 9, None)
            .await
            .unwrap();
        let first = h
            .ledger
            .complete(first.id, completion(50.0, 1750.0))
            .await
            .unwrap();
        assert_eq!(first.status, PurchaseStatus::Partial);
        h.ledger.cancel(first.id).await.unwrap();

        let reopened = potato_lot(&h).await;
        assert_eq!(reopened.lot_id, lot.lot_id);
        assert_eq!(reopened.total_quantity, 180.0);

        let second = h
            .ledger
            .create_purchase_from_lot(&lot.lot_id, 10, None)
            .await
            .unwrap();
        let second = h
            .ledger
            .complete(second.id, completion(180.0, 6300.0))
            .await
            .unwrap();
        assert_eq!(second.status, PurchaseStatus::Completed);

        let a = h.orders.get_order_by_id(a.order.id).await.unwrap();
        assert_eq!(a.items[0].purchase_id, Some(second.id));
        assert_eq!(a.order.total_amount, 3500.0);
    }

    #[tokio::test]
    async fn test_stale_lot_cannot_rebuy_lines() {
        let h = harness().await;
        let a = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        sent_order(&h, 2, &[("Potato", 80.0)]).await;
        let stale = potato_lot(&h).await;

        let first = h.ledger.create_from_lot(&stale, 9).await.unwrap();
        let first = h
            .ledger
            .complete(first.id, completion(180.0, 6300.0))
            .await
            .unwrap();

        // a buyer still holding the old lot list
        let err = h.ledger.create_from_lot(&stale, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(matches!(err, PurchasingError::StaleLot(ref id) if *id == stale.lot_id));
        assert_eq!(h.ledger.list(None, 50, 0).await.unwrap().len(), 1);

        let mut conn = h.pool.acquire().await.unwrap();
        assert_eq!(
            order_item::sum_allocated(&mut conn, first.id).await.unwrap(),
            (2, 6300.0)
        );
        drop(conn);
        let a = h.orders.get_order_by_id(a.order.id).await.unwrap();
        assert_eq!(a.items[0].price, Some(35.0));
        assert_eq!(a.items[0].purchase_id, Some(first.id));
    }

    #[tokio::test]
    async fn test_allocation_refuses_lines_of_another_purchase() {
        let h = harness().await;
        let order = sent_order(&h, 1, &[("Potato", 100.0)]).await;
        let lot = potato_lot(&h).await;
        let first = h.ledger.create_from_lot(&lot, 9).await.unwrap();
        let first = h
            .ledger
            .complete(first.id, completion(100.0, 3500.0))
            .await
            .unwrap();

        // a record whose snapshot points at already bought lines
        let id = {
            let mut conn = h.pool.acquire().await.unwrap();
            purchase::insert(
                &mut conn,
                NewPurchase {
                    lot_id: "foreign00000",
                    product_name: "Potato",
                    unit: "kg",
                    buyer_id: 10,
                    required_quantity: 100.0,
                    orders_data: &lot.snapshot(),
                },
                NOW,
            )
            .await
            .unwrap()
        };
        let err = h
            .ledger
            .complete(id, completion(100.0, 9000.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PurchasingError::LineAlreadyPurchased { item_id } if item_id == order.items[0].id
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let order = h.orders.get_order_by_id(order.order.id).await.unwrap();
        assert_eq!(order.items[0].price, Some(35.0));
        assert_eq!(order.items[0].purchase_id, Some(first.id));
        assert_eq!(order.order.total_amount, 3500.0);
        assert_eq!(
            h.ledger.get_by_id(id).await.unwrap().status,
            PurchaseStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_line_total_uses_exact_unit_price() {
        let h = harness().await;
        let order = sent_order(&h, 1, &[("Potato", 1000.0)]).await;
        let lot = potato_lot(&h).await;
        let record = h.ledger.create_from_lot(&lot, 9).await.unwrap();
        let record = h
            .ledger
            .complete(record.id, completion(1000.0, 33333.33))
            .await
            .unwrap();

        // stored price is rounded to 4 dp, the total is not re-derived from it
        assert_eq!(record.unit_price, Some(33.3333));
        let order = h.orders.get_order_by_id(order.order.id).await.unwrap();
        assert_eq!(order.items[0].price, Some(33.3333));
        assert_eq!(order.items[0].total, Some(33333.33));
        assert_eq!(order.order.total_amount, 33333.33);
    }
}
