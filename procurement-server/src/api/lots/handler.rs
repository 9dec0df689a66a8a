//! Lot API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use shared::models::{ConsolidatedLot, LotFilter, OrderStatus};

use crate::core::{PurchasingError, ServerState};
use crate::utils::{AppError, AppResult};

/// `?statuses=SENT,PROCESSING&from=..&to=..`
#[derive(Debug, Default, Deserialize)]
pub struct LotQuery {
    pub statuses: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl LotQuery {
    /// None when nothing was given, so the engine's defaults apply
    pub fn into_filter(self) -> AppResult<Option<LotFilter>> {
        if self.statuses.is_none() && self.from.is_none() && self.to.is_none() {
            return Ok(None);
        }
        let statuses = match self.statuses.as_deref() {
            Some(raw) => parse_statuses(raw)?,
            None => Vec::new(),
        };
        Ok(Some(LotFilter {
            statuses,
            from: self.from,
            to: self.to,
        }))
    }
}

pub fn parse_statuses(raw: &str) -> AppResult<Vec<OrderStatus>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            OrderStatus::parse(s)
                .ok_or_else(|| AppError::validation(format!("Unknown order status: {s}")))
        })
        .collect()
}

/// GET /api/lots - 当前合并批次
pub async fn list(
    State(state): State<ServerState>,
    Query(query): Query<LotQuery>,
) -> AppResult<Json<Vec<ConsolidatedLot>>> {
    let filter = query.into_filter()?;
    let lots = state.consolidation.get_consolidated_lots(filter).await?;
    Ok(Json(lots))
}

/// GET /api/lots/:lot_id - 单个批次
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(lot_id): Path<String>,
    Query(query): Query<LotQuery>,
) -> AppResult<Json<ConsolidatedLot>> {
    let filter = query.into_filter()?;
    let lot = state
        .consolidation
        .find_lot(&lot_id, filter)
        .await?
        .ok_or(PurchasingError::LotNotFound(lot_id))?;
    Ok(Json(lot))
}
