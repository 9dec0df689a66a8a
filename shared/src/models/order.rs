//! Order Model (餐厅采购订单)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle status
///
/// ```text
/// DRAFT → SENT → PROCESSING → APPROVED → PURCHASED → COMPLETED
///                PROCESSING → REJECTED
///         SENT | PROCESSING → CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum OrderStatus {
    Draft,
    Sent,
    Processing,
    Approved,
    Purchased,
    Completed,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    /// Whether `next` is directly reachable from `self`
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Draft, Sent)
                | (Sent, Processing)
                | (Processing, Approved)
                | (Approved, Purchased)
                | (Purchased, Completed)
                | (Processing, Rejected)
                | (Sent, Cancelled)
                | (Processing, Cancelled)
        )
    }

    /// Only drafts accept line additions, removals and quantity edits
    pub fn lines_editable(self) -> bool {
        self == OrderStatus::Draft
    }

    /// Staff may set line prices manually in these states
    pub fn prices_editable(self) -> bool {
        matches!(self, OrderStatus::Processing | OrderStatus::Purchased)
    }

    /// Purchase allocation may write realized prices in these states
    pub fn accepts_allocation(self) -> bool {
        matches!(
            self,
            OrderStatus::Sent
                | OrderStatus::Processing
                | OrderStatus::Approved
                | OrderStatus::Purchased
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "DRAFT",
            OrderStatus::Sent => "SENT",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Approved => "APPROVED",
            OrderStatus::Purchased => "PURCHASED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse the wire/storage name (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(OrderStatus::Draft),
            "SENT" => Some(OrderStatus::Sent),
            "PROCESSING" => Some(OrderStatus::Processing),
            "APPROVED" => Some(OrderStatus::Approved),
            "PURCHASED" => Some(OrderStatus::Purchased),
            "COMPLETED" => Some(OrderStatus::Completed),
            "REJECTED" => Some(OrderStatus::Rejected),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order record - one restaurant's purchasing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Order {
    pub id: i64,
    pub restaurant_id: i64,
    /// Restaurant user who created the order (notification target)
    pub created_by: i64,
    pub status: OrderStatus,
    /// Σ line totals, maintained by the aggregator
    pub total_amount: f64,
    pub sent_at: Option<i64>,
    pub sent_by: Option<i64>,
    pub processing_at: Option<i64>,
    pub processing_by: Option<i64>,
    pub approved_at: Option<i64>,
    pub approved_by: Option<i64>,
    pub rejected_at: Option<i64>,
    pub rejected_by: Option<i64>,
    pub purchased_at: Option<i64>,
    pub purchased_by: Option<i64>,
    pub completed_at: Option<i64>,
    pub completed_by: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub cancelled_by: Option<i64>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub manager_comment: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Order line item - one product request within an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct OrderLineItem {
    pub id: i64,
    pub order_id: i64,
    pub product_name: String,
    pub unit: String,
    pub quantity: f64,
    /// Unit price, null until priced
    pub price: Option<f64>,
    /// quantity × price, null until priced
    pub total: Option<f64>,
    /// Purchase whose allocation priced this line
    pub purchase_id: Option<i64>,
}

/// Order with its line items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderLineItem>,
}

/// Line item input (order creation / add item)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineInput {
    pub product_name: String,
    pub unit: String,
    pub quantity: f64,
    /// Expected unit price, optional
    pub price: Option<f64>,
}

/// Create order payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreate {
    pub restaurant_id: i64,
    pub created_by: i64,
    #[serde(default)]
    pub items: Vec<OrderLineInput>,
    pub manager_comment: Option<String>,
}

/// Update line item payload (drafts only)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderLineUpdate {
    pub product_name: Option<String>,
    pub unit: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
}

/// Status change payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub status: OrderStatus,
    pub actor_id: i64,
    pub reason: Option<String>,
}

/// Order list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub restaurant_id: Option<i64>,
    pub status: Option<OrderStatus>,
}
