//! Order total aggregation
//!
//! `total_amount` is owned by this module: every price mutation calls
//! [`recalculate`] on the same connection (transaction) that changed the lines.

use sqlx::SqliteConnection;

use super::money;
use crate::core::error::{PurchasingError, PurchasingResult};
use crate::db::repository::{RepoError, order, order_item};

/// Recompute Σ line totals (unpriced lines count as zero) and store it.
/// Idempotent; returns the stored total.
pub async fn recalculate(
    conn: &mut SqliteConnection,
    order_id: i64,
    now: i64,
) -> PurchasingResult<f64> {
    let totals = order_item::find_totals(conn, order_id).await?;
    let total = money::sum_totals(&totals);

    order::set_total(conn, order_id, total, now)
        .await
        .map_err(|e| match e {
            RepoError::NotFound(_) => PurchasingError::OrderNotFound(order_id),
            other => other.into(),
        })?;

    tracing::debug!(order_id, total, lines = totals.len(), "Order total recalculated");
    Ok(total)
}
