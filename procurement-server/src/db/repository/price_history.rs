//! Price History Repository (append-only)

use super::{RepoError, RepoResult};
use shared::models::{HistoryPosition, PriceHistoryEntry, PriceType};
use sqlx::SqliteConnection;

const ENTRY_COLUMNS: &str =
    "id, product_name, product_key, unit, price_type, price, source, source_id, effective_date";

/// Normalized row ready for insertion
#[derive(Debug, Clone)]
pub struct NewPriceEntry<'a> {
    pub product_name: &'a str,
    pub product_key: &'a str,
    pub unit: &'a str,
    pub price_type: PriceType,
    pub price: f64,
    pub source: &'a str,
    pub source_id: Option<i64>,
    pub effective_date: i64,
}

pub async fn insert(conn: &mut SqliteConnection, entry: NewPriceEntry<'_>) -> RepoResult<PriceHistoryEntry> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO price_history (product_name, product_key, unit, price_type, price, source, source_id, effective_date) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING id",
    )
    .bind(entry.product_name)
    .bind(entry.product_key)
    .bind(entry.unit)
    .bind(entry.price_type)
    .bind(entry.price)
    .bind(entry.source)
    .bind(entry.source_id)
    .bind(entry.effective_date)
    .fetch_one(&mut *conn)
    .await?;

    find_by_id(conn, id)
        .await?
        .ok_or_else(|| RepoError::Database("Failed to create price history entry".into()))
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> RepoResult<Option<PriceHistoryEntry>> {
    let entry = sqlx::query_as::<_, PriceHistoryEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM price_history WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(entry)
}

/// Most recent entry for (key, unit, type), optionally scoped to one source id
pub async fn find_latest(
    conn: &mut SqliteConnection,
    product_key: &str,
    unit: &str,
    price_type: PriceType,
    source_id: Option<i64>,
) -> RepoResult<Option<PriceHistoryEntry>> {
    let entry = sqlx::query_as::<_, PriceHistoryEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM price_history WHERE product_key = ?1 AND unit = ?2 AND price_type = ?3 AND (?4 IS NULL OR source_id = ?4) ORDER BY effective_date DESC, id DESC LIMIT 1"
    ))
    .bind(product_key)
    .bind(unit)
    .bind(price_type)
    .bind(source_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(entry)
}

/// One keyset page, newest first, strictly after `before`
pub async fn find_page(
    conn: &mut SqliteConnection,
    product_key: &str,
    unit: &str,
    price_type: Option<PriceType>,
    before: Option<HistoryPosition>,
    limit: i64,
) -> RepoResult<Vec<PriceHistoryEntry>> {
    let (before_date, before_id) = match before {
        Some(pos) => (Some(pos.effective_date), Some(pos.id)),
        None => (None, None),
    };
    let entries = sqlx::query_as::<_, PriceHistoryEntry>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM price_history WHERE product_key = ?1 AND unit = ?2 AND (?3 IS NULL OR price_type = ?3) AND (?4 IS NULL OR effective_date < ?4 OR (effective_date = ?4 AND id < ?5)) ORDER BY effective_date DESC, id DESC LIMIT ?6"
    ))
    .bind(product_key)
    .bind(unit)
    .bind(price_type)
    .bind(before_date)
    .bind(before_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(entries)
}
