//! Order Repository

use super::{RepoError, RepoResult};
use shared::models::{Order, OrderFilter, OrderStatus};
use sqlx::SqliteConnection;

const ORDER_COLUMNS: &str = "id, restaurant_id, created_by, status, total_amount, sent_at, sent_by, processing_at, processing_by, approved_at, approved_by, rejected_at, rejected_by, purchased_at, purchased_by, completed_at, completed_by, cancelled_at, cancelled_by, rejection_reason, cancellation_reason, manager_comment, created_at, updated_at";

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> RepoResult<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(order)
}

pub async fn find_all(
    conn: &mut SqliteConnection,
    filter: &OrderFilter,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE (?1 IS NULL OR restaurant_id = ?1) AND (?2 IS NULL OR status = ?2) ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4"
    ))
    .bind(filter.restaurant_id)
    .bind(filter.status)
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;
    Ok(orders)
}

pub async fn insert(
    conn: &mut SqliteConnection,
    restaurant_id: i64,
    created_by: i64,
    manager_comment: Option<&str>,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO orders (restaurant_id, created_by, status, total_amount, manager_comment, created_at, updated_at) VALUES (?1, ?2, 'DRAFT', 0, ?3, ?4, ?4) RETURNING id",
    )
    .bind(restaurant_id)
    .bind(created_by)
    .bind(manager_comment)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Timestamp/actor columns written by a transition into `status`
fn transition_columns(status: OrderStatus) -> Option<(&'static str, &'static str)> {
    match status {
        OrderStatus::Draft => None,
        OrderStatus::Sent => Some(("sent_at", "sent_by")),
        OrderStatus::Processing => Some(("processing_at", "processing_by")),
        OrderStatus::Approved => Some(("approved_at", "approved_by")),
        OrderStatus::Purchased => Some(("purchased_at", "purchased_by")),
        OrderStatus::Completed => Some(("completed_at", "completed_by")),
        OrderStatus::Rejected => Some(("rejected_at", "rejected_by")),
        OrderStatus::Cancelled => Some(("cancelled_at", "cancelled_by")),
    }
}

/// Move an order from `from` to `to`, stamping the transition columns.
///
/// Guarded on the current status; returns `NotFound` when the row is missing or
/// was moved by someone else in between.
pub async fn update_status(
    conn: &mut SqliteConnection,
    id: i64,
    from: OrderStatus,
    to: OrderStatus,
    actor_id: i64,
    reason: Option<&str>,
    now: i64,
) -> RepoResult<()> {
    let (at_col, by_col) = transition_columns(to)
        .ok_or_else(|| RepoError::Validation(format!("Cannot move order back to {to}")))?;

    let reason_col = match to {
        OrderStatus::Rejected => ", rejection_reason = ?6",
        OrderStatus::Cancelled => ", cancellation_reason = ?6",
        _ => "",
    };

    let sql = format!(
        "UPDATE orders SET status = ?1, {at_col} = ?2, {by_col} = ?3, updated_at = ?2{reason_col} WHERE id = ?4 AND status = ?5"
    );
    let mut query = sqlx::query(&sql)
        .bind(to)
        .bind(now)
        .bind(actor_id)
        .bind(id)
        .bind(from);
    if !reason_col.is_empty() {
        query = query.bind(reason);
    }

    let rows = query.execute(&mut *conn).await?;
    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!(
            "Order {id} not found in status {from}"
        )));
    }
    Ok(())
}

pub async fn set_total(
    conn: &mut SqliteConnection,
    id: i64,
    total_amount: f64,
    now: i64,
) -> RepoResult<()> {
    let rows = sqlx::query("UPDATE orders SET total_amount = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(total_amount)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("Order {id} not found")));
    }
    Ok(())
}

pub async fn set_manager_comment(
    conn: &mut SqliteConnection,
    id: i64,
    comment: Option<&str>,
    now: i64,
) -> RepoResult<()> {
    let rows =
        sqlx::query("UPDATE orders SET manager_comment = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(comment)
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("Order {id} not found")));
    }
    Ok(())
}

pub async fn touch(conn: &mut SqliteConnection, id: i64, now: i64) -> RepoResult<()> {
    sqlx::query("UPDATE orders SET updated_at = ?1 WHERE id = ?2")
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Delete an order that is still a draft (items cascade)
pub async fn delete_draft(conn: &mut SqliteConnection, id: i64) -> RepoResult<bool> {
    let rows = sqlx::query("DELETE FROM orders WHERE id = ? AND status = 'DRAFT'")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(rows.rows_affected() > 0)
}
