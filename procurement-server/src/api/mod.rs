//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`orders`] - 餐厅订单与状态流转
//! - [`lots`] - 合并采购批次 (只读, 实时计算)
//! - [`purchases`] - 采购记录、完成与成本分摊
//! - [`prices`] - 价格历史与分析

use axum::Router;

use crate::core::ServerState;

pub mod health;
pub mod lots;
pub mod orders;
pub mod prices;
pub mod purchases;

pub use crate::utils::{ApiResponse, AppResult};

/// Build the Axum router (without state)
pub fn build_app() -> Router<ServerState> {
    Router::<ServerState>::new()
        .merge(health::router())
        .merge(orders::router())
        .merge(lots::router())
        .merge(purchases::router())
        .merge(prices::router())
}
