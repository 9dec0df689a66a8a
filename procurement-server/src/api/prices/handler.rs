//! Price History API Handlers

use axum::{
    Json,
    extract::{Query, State},
};
use futures::TryStreamExt;
use serde::Deserialize;
use shared::models::{
    HistoryPosition, HistoryQuery, PriceHistoryCreate, PriceHistoryEntry, PriceMargin, PriceTrend,
    PriceType,
};

use crate::core::{PurchasingError, ServerState};
use crate::utils::{AppError, AppResult};

/// Largest page served by `/history`
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub product: String,
    pub unit: String,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub product: String,
    pub unit: String,
    pub price_type: PriceType,
    pub source_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub product: String,
    pub unit: String,
    pub price_type: Option<PriceType>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Keyset cursor: both halves of the last position seen
    pub before_date: Option<i64>,
    pub before_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    pub product: String,
    pub unit: String,
    pub price_type: PriceType,
    #[serde(default = "default_samples")]
    pub samples: usize,
}

fn default_limit() -> usize {
    50
}

fn default_samples() -> usize {
    10
}

/// POST /api/prices - 记录价格
pub async fn record(
    State(state): State<ServerState>,
    Json(payload): Json<PriceHistoryCreate>,
) -> AppResult<Json<PriceHistoryEntry>> {
    Ok(Json(state.prices.record(payload).await?))
}

/// GET /api/prices/latest
pub async fn latest(
    State(state): State<ServerState>,
    Query(query): Query<LatestQuery>,
) -> AppResult<Json<PriceHistoryEntry>> {
    let entry = state
        .prices
        .latest(&query.product, &query.unit, query.price_type, query.source_id)
        .await?
        .ok_or_else(|| PurchasingError::PriceHistoryEmpty {
            product: query.product.trim().to_string(),
            unit: query.unit.trim().to_string(),
            price_type: query.price_type,
        })?;
    Ok(Json(entry))
}

/// GET /api/prices/history - 最新在前
pub async fn history(
    State(state): State<ServerState>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<Vec<PriceHistoryEntry>>> {
    let before = match (params.before_date, params.before_id) {
        (Some(effective_date), Some(id)) => Some(HistoryPosition { effective_date, id }),
        (None, None) => None,
        _ => {
            return Err(AppError::invalid_request(
                "before_date and before_id must be given together",
            ));
        }
    };

    let entries = state
        .prices
        .history(HistoryQuery {
            product_name: params.product,
            unit: params.unit,
            price_type: params.price_type,
            limit: params.limit.min(MAX_HISTORY_LIMIT),
            before,
        })
        .try_collect::<Vec<_>>()
        .await?;
    Ok(Json(entries))
}

/// GET /api/prices/trend
pub async fn trend(
    State(state): State<ServerState>,
    Query(query): Query<TrendQuery>,
) -> AppResult<Json<PriceTrend>> {
    let trend = state
        .prices
        .trend(&query.product, &query.unit, query.price_type, query.samples)
        .await?;
    Ok(Json(trend))
}

/// GET /api/prices/margin - 最新售价 − 最新采购价
pub async fn margin(
    State(state): State<ServerState>,
    Query(query): Query<ProductQuery>,
) -> AppResult<Json<PriceMargin>> {
    Ok(Json(state.prices.margin(&query.product, &query.unit).await?))
}
