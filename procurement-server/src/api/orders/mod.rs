//! Order API Module
//!
//! Restaurant orders: line editing while DRAFT, then the status machine.

mod handler;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::core::ServerState;

/// Order router
pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/orders", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler::list).post(handler::create))
        .route("/{id}", get(handler::get_by_id).delete(handler::delete_draft))
        .route("/{id}/status", post(handler::update_status))
        .route("/{id}/comment", put(handler::set_comment))
        .route("/{id}/items", post(handler::add_item))
        .route(
            "/{id}/items/{item_id}",
            put(handler::update_item).delete(handler::remove_item),
        )
        .route("/{id}/items/{item_id}/price", put(handler::set_item_price))
}
