//! Consolidated lot API 模块
//!
//! Lots are computed on every request from open demand.

mod handler;

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/lots", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler::list))
        .route("/{lot_id}", get(handler::get_by_id))
}
