//! Purchase Model (采购记录)

use serde::{Deserialize, Serialize};
use std::fmt;

use super::lot::LotFilter;

/// Purchase record status
///
/// ```text
/// PENDING → PARTIAL → COMPLETED
/// PENDING → COMPLETED
/// PENDING | PARTIAL → CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum PurchaseStatus {
    Pending,
    Partial,
    Completed,
    Cancelled,
}

impl PurchaseStatus {
    /// Active records hold the lot; at most one per lot_id
    pub fn is_active(self) -> bool {
        matches!(self, PurchaseStatus::Pending | PurchaseStatus::Partial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "PENDING",
            PurchaseStatus::Partial => "PARTIAL",
            PurchaseStatus::Completed => "COMPLETED",
            PurchaseStatus::Cancelled => "CANCELLED",
        }
    }
}

impl Default for PurchaseStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current `orders_data` schema version
pub const ORDERS_SNAPSHOT_VERSION: u32 = 1;

/// One order line captured in the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub item_id: i64,
    pub quantity: f64,
}

/// One contributing order captured in the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub order_id: i64,
    pub restaurant_id: i64,
    /// Σ quantity of this order's lines in the lot
    pub quantity: f64,
    pub items: Vec<SnapshotItem>,
}

/// Immutable allocation basis taken when the purchase is created
///
/// Persisted as versioned JSON in `purchases.orders_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdersSnapshot {
    pub version: u32,
    pub entries: Vec<SnapshotEntry>,
}

impl OrdersSnapshot {
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self {
            version: ORDERS_SNAPSHOT_VERSION,
            entries,
        }
    }

    /// Σ entry quantities
    pub fn total_quantity(&self) -> f64 {
        self.entries.iter().map(|e| e.quantity).sum()
    }

    /// Number of snapshot lines across all entries
    pub fn line_count(&self) -> usize {
        self.entries.iter().map(|e| e.items.len()).sum()
    }

    pub fn order_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.order_id).collect()
    }
}

/// Purchase record - one buying transaction against one lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: i64,
    pub lot_id: String,
    pub product_name: String,
    pub unit: String,
    pub buyer_id: i64,
    pub required_quantity: f64,
    pub purchased_quantity: Option<f64>,
    pub total_price: Option<f64>,
    pub unit_price: Option<f64>,
    pub status: PurchaseStatus,
    pub orders_data: OrdersSnapshot,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
}

/// Claim a lot payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseCreate {
    pub lot_id: String,
    pub buyer_id: i64,
    /// Eligibility used to re-derive the lot; defaults apply when absent
    #[serde(default)]
    pub filter: Option<LotFilter>,
}

/// Complete (or partially complete) a purchase payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseComplete {
    pub actual_quantity: f64,
    pub actual_total_price: f64,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(order_id: i64, quantities: &[f64]) -> SnapshotEntry {
        SnapshotEntry {
            order_id,
            restaurant_id: order_id * 10,
            quantity: quantities.iter().sum(),
            items: quantities
                .iter()
                .enumerate()
                .map(|(i, q)| SnapshotItem {
                    item_id: order_id * 100 + i as i64,
                    quantity: *q,
                })
                .collect(),
        }
    }

    #[test]
    fn test_snapshot_totals() {
        let snapshot = OrdersSnapshot::new(vec![entry(1, &[60.0, 40.0]), entry(2, &[80.0])]);
        assert_eq!(snapshot.version, ORDERS_SNAPSHOT_VERSION);
        assert_eq!(snapshot.total_quantity(), 180.0);
        assert_eq!(snapshot.line_count(), 3);
        assert_eq!(snapshot.order_ids(), vec![1, 2]);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = OrdersSnapshot::new(vec![entry(1, &[100.0])]);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["entries"][0]["order_id"], 1);
        assert_eq!(json["entries"][0]["restaurant_id"], 10);
        assert_eq!(json["entries"][0]["items"][0]["item_id"], 100);
    }

    #[test]
    fn test_active_statuses() {
        assert!(PurchaseStatus::Pending.is_active());
        assert!(PurchaseStatus::Partial.is_active());
        assert!(!PurchaseStatus::Completed.is_active());
        assert!(!PurchaseStatus::Cancelled.is_active());
    }
}
