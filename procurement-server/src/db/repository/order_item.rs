//! Order Line Item Repository

use super::{RepoError, RepoResult};
use shared::models::{OrderLineItem, OrderStatus};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

const ITEM_COLUMNS: &str = "id, order_id, product_name, unit, quantity, price, total, purchase_id";

/// Open demand line joined with its order, input to consolidation
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OpenLine {
    pub item_id: i64,
    pub order_id: i64,
    pub restaurant_id: i64,
    pub product_name: String,
    pub unit: String,
    pub quantity: f64,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UnboughtLine {
    pub item_id: i64,
    pub order_id: i64,
    pub status: OrderStatus,
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> RepoResult<Option<OrderLineItem>> {
    let item = sqlx::query_as::<_, OrderLineItem>(&format!(
        "SELECT {ITEM_COLUMNS} FROM order_items WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(item)
}

pub async fn find_by_order(
    conn: &mut SqliteConnection,
    order_id: i64,
) -> RepoResult<Vec<OrderLineItem>> {
    let items = sqlx::query_as::<_, OrderLineItem>(&format!(
        "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ? ORDER BY id"
    ))
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

pub async fn count_by_order(conn: &mut SqliteConnection, order_id: i64) -> RepoResult<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM order_items WHERE order_id = ?")
        .bind(order_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Line totals of an order (null while unpriced)
pub async fn find_totals(conn: &mut SqliteConnection, order_id: i64) -> RepoResult<Vec<Option<f64>>> {
    let totals = sqlx::query_scalar::<_, Option<f64>>("SELECT total FROM order_items WHERE order_id = ?")
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(totals)
}

pub async fn insert(
    conn: &mut SqliteConnection,
    order_id: i64,
    product_name: &str,
    unit: &str,
    quantity: f64,
    price: Option<f64>,
    total: Option<f64>,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO order_items (order_id, product_name, unit, quantity, price, total) VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
    )
    .bind(order_id)
    .bind(product_name)
    .bind(unit)
    .bind(quantity)
    .bind(price)
    .bind(total)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Overwrite every editable column of a line
pub async fn update(conn: &mut SqliteConnection, item: &OrderLineItem) -> RepoResult<()> {
    let rows = sqlx::query(
        "UPDATE order_items SET product_name = ?1, unit = ?2, quantity = ?3, price = ?4, total = ?5 WHERE id = ?6",
    )
    .bind(&item.product_name)
    .bind(&item.unit)
    .bind(item.quantity)
    .bind(item.price)
    .bind(item.total)
    .bind(item.id)
    .execute(&mut *conn)
    .await?;
    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("Order item {} not found", item.id)));
    }
    Ok(())
}

pub async fn set_price(
    conn: &mut SqliteConnection,
    id: i64,
    price: f64,
    total: f64,
) -> RepoResult<()> {
    let rows = sqlx::query("UPDATE order_items SET price = ?1, total = ?2 WHERE id = ?3")
        .bind(price)
        .bind(total)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("Order item {id} not found")));
    }
    Ok(())
}

/// Write a realized price from a purchase and mark the line as bought.
///
/// A line already owned by another purchase is left alone and reported as
/// `Duplicate`; the owning purchase may re-allocate its own lines.
pub async fn allocate(
    conn: &mut SqliteConnection,
    id: i64,
    order_id: i64,
    price: f64,
    total: f64,
    purchase_id: i64,
) -> RepoResult<()> {
    let rows = sqlx::query(
        "UPDATE order_items SET price = ?1, total = ?2, purchase_id = ?3 WHERE id = ?4 AND order_id = ?5 AND (purchase_id IS NULL OR purchase_id = ?3)",
    )
    .bind(price)
    .bind(total)
    .bind(purchase_id)
    .bind(id)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;
    if rows.rows_affected() == 0 {
        return match find_by_id(conn, id).await? {
            Some(OrderLineItem {
                order_id: owner_order,
                purchase_id: Some(owner),
                ..
            }) if owner_order == order_id => Err(RepoError::Duplicate(format!(
                "Order item {id} already belongs to purchase {owner}"
            ))),
            _ => Err(RepoError::NotFound(format!(
                "Order item {id} of order {order_id} not found"
            ))),
        };
    }
    Ok(())
}

/// Un-buy every line priced by `purchase_id`: price, total and owner are
/// cleared so the lines are open demand again. Returns the lines released.
pub async fn release(conn: &mut SqliteConnection, purchase_id: i64) -> RepoResult<u64> {
    let rows = sqlx::query(
        "UPDATE order_items SET price = NULL, total = NULL, purchase_id = NULL WHERE purchase_id = ?",
    )
    .bind(purchase_id)
    .execute(&mut *conn)
    .await?;
    Ok(rows.rows_affected())
}

/// Unbought lines among `item_ids`, with their order's current status
pub async fn find_unbought(
    conn: &mut SqliteConnection,
    item_ids: &[i64],
) -> RepoResult<Vec<UnboughtLine>> {
    if item_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT i.id AS item_id, i.order_id, o.status FROM order_items i JOIN orders o ON o.id = i.order_id WHERE i.purchase_id IS NULL AND i.id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in item_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let lines = qb
        .build_query_as::<UnboughtLine>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(lines)
}

/// Σ total of lines priced by a purchase
pub async fn sum_allocated(conn: &mut SqliteConnection, purchase_id: i64) -> RepoResult<(i64, f64)> {
    let row = sqlx::query_as::<_, (i64, f64)>(
        "SELECT COUNT(*), COALESCE(SUM(total), 0.0) FROM order_items WHERE purchase_id = ?",
    )
    .bind(purchase_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> RepoResult<bool> {
    let rows = sqlx::query("DELETE FROM order_items WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(rows.rows_affected() > 0)
}

/// Unpurchased lines of orders in `statuses` whose activity date
/// (`COALESCE(sent_at, created_at)`) falls in `[from, to)`.
pub async fn find_open_lines(
    conn: &mut SqliteConnection,
    statuses: &[OrderStatus],
    from: Option<i64>,
    to: Option<i64>,
) -> RepoResult<Vec<OpenLine>> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT i.id AS item_id, i.order_id, o.restaurant_id, i.product_name, i.unit, i.quantity, i.price FROM order_items i JOIN orders o ON o.id = i.order_id WHERE i.purchase_id IS NULL AND o.status IN (",
    );
    let mut separated = qb.separated(", ");
    for status in statuses {
        separated.push_bind(*status);
    }
    separated.push_unseparated(")");

    if let Some(from) = from {
        qb.push(" AND COALESCE(o.sent_at, o.created_at) >= ").push_bind(from);
    }
    if let Some(to) = to {
        qb.push(" AND COALESCE(o.sent_at, o.created_at) < ").push_bind(to);
    }
    qb.push(" ORDER BY i.order_id, i.id");

    let lines = qb
        .build_query_as::<OpenLine>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(lines)
}
