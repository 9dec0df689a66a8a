//! Purchase API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use shared::models::{PurchaseComplete, PurchaseCreate, PurchaseRecord, PurchaseStatus};

use crate::core::ServerState;
use crate::purchasing::purchase_entry::{self, EntryTarget, PurchaseEntryInput, PurchaseEntryState};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<PurchaseStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/purchases - 采购记录列表
pub async fn list(
    State(state): State<ServerState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<PurchaseRecord>>> {
    let records = state
        .ledger
        .list(query.status, query.limit, query.offset)
        .await?;
    Ok(Json(records))
}

/// POST /api/purchases - 认领批次
pub async fn create(
    State(state): State<ServerState>,
    Json(payload): Json<PurchaseCreate>,
) -> AppResult<Json<PurchaseRecord>> {
    let record = state
        .ledger
        .create_purchase_from_lot(&payload.lot_id, payload.buyer_id, payload.filter)
        .await?;
    Ok(Json(record))
}

/// GET /api/purchases/:id
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<PurchaseRecord>> {
    Ok(Json(state.ledger.get_by_id(id).await?))
}

/// GET /api/purchases/by-lot/:lot_id - 批次当前的有效采购
pub async fn get_active_by_lot(
    State(state): State<ServerState>,
    Path(lot_id): Path<String>,
) -> AppResult<Json<PurchaseRecord>> {
    let record = state
        .ledger
        .find_active_by_lot(&lot_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Active purchase for lot {lot_id}")))?;
    Ok(Json(record))
}

/// POST /api/purchases/:id/complete - 录入实际采购并分摊成本
pub async fn complete(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Json(payload): Json<PurchaseComplete>,
) -> AppResult<Json<PurchaseRecord>> {
    Ok(Json(state.ledger.complete(id, payload).await?))
}

/// POST /api/purchases/:id/cancel
pub async fn cancel(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<PurchaseRecord>> {
    Ok(Json(state.ledger.cancel(id).await?))
}

/// Entry input as sent by clients: a purchase is selected by id
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStepInput {
    Select { purchase_id: i64 },
    EnterQuantity { quantity: f64 },
    EnterTotal { total: f64, notes: Option<String> },
    Confirm,
    Back,
    Reset,
}

#[derive(Debug, Deserialize)]
pub struct EntryStepRequest {
    #[serde(default)]
    pub state: PurchaseEntryState,
    pub input: EntryStepInput,
}

#[derive(Debug, Serialize)]
pub struct EntryStepResponse {
    pub state: PurchaseEntryState,
    /// Present once a confirmed entry has been executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase: Option<PurchaseRecord>,
}

/// POST /api/purchases/entry - 推进采购录入流程一步
///
/// The client holds the state between calls. Confirming executes the
/// completion.
pub async fn entry_step(
    State(state): State<ServerState>,
    Json(request): Json<EntryStepRequest>,
) -> AppResult<Json<EntryStepResponse>> {
    let input = match request.input {
        EntryStepInput::Select { purchase_id } => {
            let record = state.ledger.get_by_id(purchase_id).await?;
            PurchaseEntryInput::Select {
                target: EntryTarget::try_from(&record)?,
            }
        }
        EntryStepInput::EnterQuantity { quantity } => PurchaseEntryInput::EnterQuantity { quantity },
        EntryStepInput::EnterTotal { total, notes } => PurchaseEntryInput::EnterTotal { total, notes },
        EntryStepInput::Confirm => PurchaseEntryInput::Confirm,
        EntryStepInput::Back => PurchaseEntryInput::Back,
        EntryStepInput::Reset => PurchaseEntryInput::Reset,
    };

    let next = purchase_entry::apply(request.state, input)?;
    let purchase = match next.command() {
        Some(command) => Some(state.ledger.submit(command.clone()).await?),
        None => None,
    };

    Ok(Json(EntryStepResponse {
        state: next,
        purchase,
    }))
}
