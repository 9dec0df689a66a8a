//! Price History Model (价格历史)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of price recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum PriceType {
    Purchase,
    Sale,
    Suggested,
}

impl PriceType {
    pub fn as_str(self) -> &'static str {
        match self {
            PriceType::Purchase => "PURCHASE",
            PriceType::Sale => "SALE",
            PriceType::Suggested => "SUGGESTED",
        }
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only price fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct PriceHistoryEntry {
    pub id: i64,
    pub product_name: String,
    /// Normalized product name used for lookups
    pub product_key: String,
    pub unit: String,
    pub price_type: PriceType,
    pub price: f64,
    /// Producer of the fact, e.g. "purchase"
    pub source: String,
    pub source_id: Option<i64>,
    /// Unix millis
    pub effective_date: i64,
}

impl PriceHistoryEntry {
    /// Keyset position of this entry in a descending history scan
    pub fn position(&self) -> HistoryPosition {
        HistoryPosition {
            effective_date: self.effective_date,
            id: self.id,
        }
    }
}

/// New price fact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryCreate {
    pub product_name: String,
    pub unit: String,
    pub price_type: PriceType,
    pub price: f64,
    pub source: String,
    pub source_id: Option<i64>,
    /// Defaults to the recorder's clock
    pub effective_date: Option<i64>,
}

/// Resume point for history scans: entries strictly older than this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPosition {
    pub effective_date: i64,
    pub id: i64,
}

/// History scan request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub product_name: String,
    pub unit: String,
    pub price_type: Option<PriceType>,
    pub limit: usize,
    /// Restart strictly after this position
    pub before: Option<HistoryPosition>,
}

/// Price movement over the most recent samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTrend {
    pub product_name: String,
    pub unit: String,
    pub price_type: PriceType,
    pub samples: usize,
    pub oldest: f64,
    pub latest: f64,
    pub average: f64,
    pub change: f64,
    /// None when the oldest price is zero
    pub change_percent: Option<f64>,
}

/// Latest sale price against latest purchase price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceMargin {
    pub product_name: String,
    pub unit: String,
    pub purchase_price: f64,
    pub sale_price: f64,
    pub margin: f64,
    /// None when the sale price is zero
    pub margin_percent: Option<f64>,
}
