//! Order API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use shared::models::{
    Order, OrderCreate, OrderDetail, OrderFilter, OrderLineInput, OrderLineUpdate, OrderStatus,
    OrderStatusChange,
};

use crate::core::ServerState;
use crate::utils::{ApiResponse, AppResult};

/// Query params for listing orders
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub restaurant_id: Option<i64>,
    pub status: Option<OrderStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct CommentPayload {
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PricePayload {
    pub price: f64,
}

/// GET /api/orders - 订单列表 (最新在前)
pub async fn list(
    State(state): State<ServerState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let filter = OrderFilter {
        restaurant_id: query.restaurant_id,
        status: query.status,
    };
    let orders = state
        .orders
        .list_orders(&filter, query.limit, query.offset)
        .await?;
    Ok(Json(orders))
}

/// POST /api/orders - 创建草稿订单
pub async fn create(
    State(state): State<ServerState>,
    Json(payload): Json<OrderCreate>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(state.orders.create_order(payload).await?))
}

/// GET /api/orders/:id - 订单及明细
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(state.orders.get_order_by_id(id).await?))
}

/// DELETE /api/orders/:id - 删除草稿
pub async fn delete_draft(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.orders.delete_draft(id).await?;
    Ok(Json(ApiResponse::ok()))
}

/// POST /api/orders/:id/status - 状态流转
pub async fn update_status(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Json(payload): Json<OrderStatusChange>,
) -> AppResult<Json<Order>> {
    let order = state
        .orders
        .update_status(id, payload.status, payload.actor_id, payload.reason)
        .await?;
    Ok(Json(order))
}

/// PUT /api/orders/:id/comment - 经理备注
pub async fn set_comment(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Json(payload): Json<CommentPayload>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.set_manager_comment(id, payload.comment).await?))
}

/// POST /api/orders/:id/items
pub async fn add_item(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Json(payload): Json<OrderLineInput>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(state.orders.add_item(id, payload).await?))
}

/// PUT /api/orders/:id/items/:item_id
pub async fn update_item(
    State(state): State<ServerState>,
    Path((id, item_id)): Path<(i64, i64)>,
    Json(payload): Json<OrderLineUpdate>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(state.orders.update_item(id, item_id, payload).await?))
}

/// DELETE /api/orders/:id/items/:item_id
pub async fn remove_item(
    State(state): State<ServerState>,
    Path((id, item_id)): Path<(i64, i64)>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(state.orders.remove_item(id, item_id).await?))
}

/// PUT /api/orders/:id/items/:item_id/price - 员工手动定价
pub async fn set_item_price(
    State(state): State<ServerState>,
    Path((id, item_id)): Path<(i64, i64)>,
    Json(payload): Json<PricePayload>,
) -> AppResult<Json<OrderDetail>> {
    let detail = state
        .orders
        .set_item_price(id, item_id, payload.price)
        .await?;
    Ok(Json(detail))
}
