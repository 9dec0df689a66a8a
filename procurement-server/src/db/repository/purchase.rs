//! Purchase Repository
//!
//! `orders_data` crosses the storage boundary as versioned JSON; rows are
//! decoded into [`PurchaseRecord`] here and nowhere else.

use super::{RepoError, RepoResult};
use shared::models::{
    ORDERS_SNAPSHOT_VERSION, OrdersSnapshot, PurchaseRecord, PurchaseStatus,
};
use sqlx::SqliteConnection;

const PURCHASE_COLUMNS: &str = "id, lot_id, product_name, unit, buyer_id, required_quantity, purchased_quantity, total_price, unit_price, status, orders_data_json, notes, created_at, updated_at, completed_at, cancelled_at";

#[derive(Debug, sqlx::FromRow)]
struct PurchaseRow {
    id: i64,
    lot_id: String,
    product_name: String,
    unit: String,
    buyer_id: i64,
    required_quantity: f64,
    purchased_quantity: Option<f64>,
    total_price: Option<f64>,
    unit_price: Option<f64>,
    status: PurchaseStatus,
    orders_data_json: String,
    notes: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
    cancelled_at: Option<i64>,
}

impl TryFrom<PurchaseRow> for PurchaseRecord {
    type Error = RepoError;

    fn try_from(row: PurchaseRow) -> Result<Self, Self::Error> {
        let orders_data = decode_snapshot(&row.orders_data_json)?;
        Ok(PurchaseRecord {
            id: row.id,
            lot_id: row.lot_id,
            product_name: row.product_name,
            unit: row.unit,
            buyer_id: row.buyer_id,
            required_quantity: row.required_quantity,
            purchased_quantity: row.purchased_quantity,
            total_price: row.total_price,
            unit_price: row.unit_price,
            status: row.status,
            orders_data,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

pub fn encode_snapshot(snapshot: &OrdersSnapshot) -> RepoResult<String> {
    Ok(serde_json::to_string(snapshot)?)
}

pub fn decode_snapshot(json: &str) -> RepoResult<OrdersSnapshot> {
    let snapshot: OrdersSnapshot = serde_json::from_str(json)?;
    if snapshot.version == 0 || snapshot.version > ORDERS_SNAPSHOT_VERSION {
        return Err(RepoError::Serialization(format!(
            "Unsupported orders_data version {}",
            snapshot.version
        )));
    }
    Ok(snapshot)
}

/// New purchase row
#[derive(Debug, Clone)]
pub struct NewPurchase<'a> {
    pub lot_id: &'a str,
    pub product_name: &'a str,
    pub unit: &'a str,
    pub buyer_id: i64,
    pub required_quantity: f64,
    pub orders_data: &'a OrdersSnapshot,
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> RepoResult<Option<PurchaseRecord>> {
    let row = sqlx::query_as::<_, PurchaseRow>(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(PurchaseRecord::try_from).transpose()
}

/// The pending/partial purchase holding `lot_id`, if any
pub async fn find_active_by_lot(
    conn: &mut SqliteConnection,
    lot_id: &str,
) -> RepoResult<Option<PurchaseRecord>> {
    let row = sqlx::query_as::<_, PurchaseRow>(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE lot_id = ? AND status IN ('PENDING', 'PARTIAL') LIMIT 1"
    ))
    .bind(lot_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(PurchaseRecord::try_from).transpose()
}

pub async fn find_all(
    conn: &mut SqliteConnection,
    status: Option<PurchaseStatus>,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<PurchaseRecord>> {
    let rows = sqlx::query_as::<_, PurchaseRow>(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
    ))
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(PurchaseRecord::try_from).collect()
}

/// Insert a pending purchase. The partial unique index turns a second active
/// row for the same lot into `RepoError::Duplicate`.
pub async fn insert(conn: &mut SqliteConnection, data: NewPurchase<'_>, now: i64) -> RepoResult<i64> {
    let orders_data_json = encode_snapshot(data.orders_data)?;
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO purchases (lot_id, product_name, unit, buyer_id, required_quantity, status, orders_data_json, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', ?6, ?7, ?7) RETURNING id",
    )
    .bind(data.lot_id)
    .bind(data.product_name)
    .bind(data.unit)
    .bind(data.buyer_id)
    .bind(data.required_quantity)
    .bind(orders_data_json)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Realized figures of a completion
#[derive(Debug, Clone)]
pub struct PurchaseOutcome<'a> {
    pub purchased_quantity: f64,
    pub total_price: f64,
    pub unit_price: f64,
    pub status: PurchaseStatus,
    pub notes: Option<&'a str>,
}

/// Record realized figures on an active purchase
pub async fn complete(
    conn: &mut SqliteConnection,
    id: i64,
    outcome: PurchaseOutcome<'_>,
    now: i64,
) -> RepoResult<()> {
    let completed_at = (outcome.status == PurchaseStatus::Completed).then_some(now);
    let rows = sqlx::query(
        "UPDATE purchases SET purchased_quantity = ?1, total_price = ?2, unit_price = ?3, status = ?4, notes = COALESCE(?5, notes), completed_at = ?6, updated_at = ?7 WHERE id = ?8 AND status IN ('PENDING', 'PARTIAL')",
    )
    .bind(outcome.purchased_quantity)
    .bind(outcome.total_price)
    .bind(outcome.unit_price)
    .bind(outcome.status)
    .bind(outcome.notes)
    .bind(completed_at)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!(
            "Active purchase {id} not found"
        )));
    }
    Ok(())
}

pub async fn cancel(conn: &mut SqliteConnection, id: i64, now: i64) -> RepoResult<()> {
    let rows = sqlx::query(
        "UPDATE purchases SET status = 'CANCELLED', cancelled_at = ?1, updated_at = ?1 WHERE id = ?2 AND status IN ('PENDING', 'PARTIAL')",
    )
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    if rows.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!(
            "Active purchase {id} not found"
        )));
    }
    Ok(())
}
