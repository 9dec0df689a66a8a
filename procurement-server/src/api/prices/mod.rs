//! Price history API 模块

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/prices", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", post(handler::record))
        .route("/latest", get(handler::latest))
        .route("/history", get(handler::history))
        .route("/trend", get(handler::trend))
        .route("/margin", get(handler::margin))
}
