//! Consolidated Lot Model (合并采购批次)
//!
//! Lots are derived from open order lines and never persisted.

use serde::{Deserialize, Serialize};

use super::order::OrderStatus;
use super::purchase::{OrdersSnapshot, SnapshotEntry, SnapshotItem};

/// One order's share of a lot (allocation basis)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotShare {
    pub order_id: i64,
    pub restaurant_id: i64,
    pub quantity: f64,
    pub items: Vec<SnapshotItem>,
}

/// Equivalent line items from many orders grouped for joint purchasing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedLot {
    /// Short deterministic hash of (product, unit)
    pub lot_id: String,
    pub product_name: String,
    pub unit: String,
    pub total_quantity: f64,
    /// Σ quantity × price over priced lines
    pub total_amount: f64,
    pub orders_count: usize,
    /// Sorted ascending
    pub contributing_orders: Vec<i64>,
    /// Sorted by order_id
    pub shares: Vec<LotShare>,
    /// total_amount / total_quantity, advisory only
    pub average_price: f64,
    /// Mean of recent realized purchase prices, advisory only
    pub average_historical_price: Option<f64>,
}

impl ConsolidatedLot {
    /// Copy the allocation basis into a purchase snapshot
    pub fn snapshot(&self) -> OrdersSnapshot {
        OrdersSnapshot::new(
            self.shares
                .iter()
                .map(|share| SnapshotEntry {
                    order_id: share.order_id,
                    restaurant_id: share.restaurant_id,
                    quantity: share.quantity,
                    items: share.items.clone(),
                })
                .collect(),
        )
    }
}

/// Which orders are eligible for consolidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotFilter {
    /// Eligible order statuses (typically SENT)
    pub statuses: Vec<OrderStatus>,
    /// Window start (unix millis, inclusive)
    pub from: Option<i64>,
    /// Window end (unix millis, exclusive)
    pub to: Option<i64>,
}

impl Default for LotFilter {
    fn default() -> Self {
        Self {
            statuses: vec![OrderStatus::Sent],
            from: None,
            to: None,
        }
    }
}
