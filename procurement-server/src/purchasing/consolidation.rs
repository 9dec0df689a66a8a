//! ConsolidationEngine - groups open demand across orders into lots
//!
//! A lot is never stored: it is recomputed from order lines whose purchase has
//! not priced them yet (`purchase_id IS NULL`). Same inputs, same lots.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sha2::{Digest, Sha256};
use shared::models::{ConsolidatedLot, LotFilter, LotShare, OrderStatus, SnapshotItem};
use shared::util::{DAY_MILLIS, normalize_key};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::error::PurchasingResult;
use crate::db::repository::order_item::{self, OpenLine};
use crate::orders::money;
use crate::pricing::history;
use crate::services::SharedClock;

/// Hex characters kept from the SHA-256 digest
const LOT_ID_LEN: usize = 12;
/// Purchase prices averaged for `average_historical_price`
const HISTORICAL_SAMPLES: usize = 5;

/// Deterministic lot id for an already-normalized (product, unit) key
pub fn lot_id(product_key: &str, unit_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(product_key.as_bytes());
    hasher.update([0x1f]);
    hasher.update(unit_key.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(LOT_ID_LEN);
    id
}

fn to_quantity(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

#[derive(Default)]
struct LotBuilder {
    product_name: String,
    unit: String,
    total_quantity: Decimal,
    total_amount: Decimal,
    /// order_id -> share
    shares: BTreeMap<i64, (i64, Decimal, Vec<SnapshotItem>)>,
}

/// Group open lines into lots, largest demand first (ties by lot id)
pub fn consolidate(lines: &[OpenLine]) -> Vec<ConsolidatedLot> {
    let mut groups: BTreeMap<(String, String), LotBuilder> = BTreeMap::new();

    for line in lines {
        let key = (normalize_key(&line.product_name), normalize_key(&line.unit));
        let lot = groups.entry(key).or_default();
        if lot.product_name.is_empty() {
            lot.product_name = line.product_name.trim().to_string();
            lot.unit = line.unit.trim().to_string();
        }

        let quantity = money::to_decimal(line.quantity);
        lot.total_quantity += quantity;
        if let Some(price) = line.price {
            lot.total_amount += quantity * money::to_decimal(price);
        }

        let share = lot
            .shares
            .entry(line.order_id)
            .or_insert_with(|| (line.restaurant_id, Decimal::ZERO, Vec::new()));
        share.1 += quantity;
        share.2.push(SnapshotItem {
            item_id: line.item_id,
            quantity: line.quantity,
        });
    }

    let mut lots: Vec<ConsolidatedLot> = groups
        .into_iter()
        .map(|((product_key, unit_key), lot)| {
            let contributing_orders: BTreeSet<i64> = lot.shares.keys().copied().collect();
            let shares = lot
                .shares
                .into_iter()
                .map(|(order_id, (restaurant_id, quantity, items))| LotShare {
                    order_id,
                    restaurant_id,
                    quantity: to_quantity(quantity),
                    items,
                })
                .collect();
            ConsolidatedLot {
                lot_id: lot_id(&product_key, &unit_key),
                product_name: lot.product_name,
                unit: lot.unit,
                total_quantity: to_quantity(lot.total_quantity),
                total_amount: money::to_f64(lot.total_amount),
                orders_count: contributing_orders.len(),
                contributing_orders: contributing_orders.into_iter().collect(),
                shares,
                average_price: money::average_price(lot.total_amount, lot.total_quantity),
                average_historical_price: None,
            }
        })
        .collect();

    lots.sort_by(|a, b| {
        b.total_quantity
            .total_cmp(&a.total_quantity)
            .then_with(|| a.lot_id.cmp(&b.lot_id))
    });
    lots
}

/// Compute lots for an already-resolved filter on one connection.
///
/// Runs inside the purchase-creation transaction, so the lot claimed is the
/// lot that exists at commit time.
pub(crate) async fn lots_on(
    conn: &mut SqliteConnection,
    filter: &LotFilter,
) -> PurchasingResult<Vec<ConsolidatedLot>> {
    let lines = order_item::find_open_lines(conn, &filter.statuses, filter.from, filter.to).await?;
    let mut lots = consolidate(&lines);
    for lot in &mut lots {
        lot.average_historical_price = history::recent_purchase_average(
            conn,
            &normalize_key(&lot.product_name),
            &normalize_key(&lot.unit),
            HISTORICAL_SAMPLES,
        )
        .await?;
    }
    Ok(lots)
}

#[derive(Clone)]
pub struct ConsolidationEngine {
    pool: SqlitePool,
    clock: SharedClock,
    window_days: i64,
    default_statuses: Vec<OrderStatus>,
}

impl ConsolidationEngine {
    pub fn new(pool: SqlitePool, clock: SharedClock) -> Self {
        Self {
            pool,
            clock,
            window_days: 7,
            default_statuses: vec![OrderStatus::Sent],
        }
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days.max(0);
        self
    }

    pub fn with_default_statuses(mut self, statuses: Vec<OrderStatus>) -> Self {
        if !statuses.is_empty() {
            self.default_statuses = statuses;
        }
        self
    }

    /// Fill in defaults: configured statuses, and the trailing window ending
    /// now when the caller gave no bounds at all
    pub fn resolve_filter(&self, filter: Option<LotFilter>) -> LotFilter {
        let mut filter = filter.unwrap_or_else(|| LotFilter {
            statuses: Vec::new(),
            from: None,
            to: None,
        });
        if filter.statuses.is_empty() {
            filter.statuses = self.default_statuses.clone();
        }
        if filter.from.is_none() && filter.to.is_none() {
            filter.from = Some(self.clock.now_millis() - self.window_days * DAY_MILLIS);
        }
        filter
    }

    pub async fn get_consolidated_lots(
        &self,
        filter: Option<LotFilter>,
    ) -> PurchasingResult<Vec<ConsolidatedLot>> {
        let filter = self.resolve_filter(filter);
        let mut conn = self.pool.acquire().await?;
        let lots = lots_on(&mut conn, &filter).await?;
        tracing::debug!(
            lots = lots.len(),
            statuses = ?filter.statuses,
            from = ?filter.from,
            "Lots consolidated"
        );
        Ok(lots)
    }

    pub async fn find_lot(
        &self,
        lot_id: &str,
        filter: Option<LotFilter>,
    ) -> PurchasingResult<Option<ConsolidatedLot>> {
        let lots = self.get_consolidated_lots(filter).await?;
        Ok(lots.into_iter().find(|lot| lot.lot_id == lot_id))
    }
}
