//! PriceHistoryRecorder - append-only price facts and analytics
//!
//! Entries are keyed by the normalized (product, unit) pair so "Potato " and
//! "potato" land in the same series. Nothing here updates or deletes rows.

use futures::stream::{self, BoxStream, StreamExt};
use shared::models::{
    HistoryPosition, HistoryQuery, PriceHistoryCreate, PriceHistoryEntry, PriceMargin, PriceTrend,
    PriceType,
};
use shared::util::normalize_key;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::VecDeque;

use crate::core::error::{PurchasingError, PurchasingResult};
use crate::db::repository::price_history::{self, NewPriceEntry};
use crate::db::{RetryPolicy, with_busy_retry};
use crate::orders::money;
use crate::services::SharedClock;

/// Rows fetched per round trip while streaming history
const PAGE_SIZE: usize = 100;

fn validate_create(entry: &PriceHistoryCreate) -> PurchasingResult<()> {
    if normalize_key(&entry.product_name).is_empty() {
        return Err(PurchasingError::Validation("product_name must not be empty".into()));
    }
    if normalize_key(&entry.unit).is_empty() {
        return Err(PurchasingError::Validation("unit must not be empty".into()));
    }
    if entry.source.trim().is_empty() {
        return Err(PurchasingError::Validation("source must not be empty".into()));
    }
    money::validate_price(entry.price, "price")
}

/// Append one entry on an existing connection (used inside purchase completion)
pub(crate) async fn record_on(
    conn: &mut SqliteConnection,
    entry: &PriceHistoryCreate,
    now: i64,
) -> PurchasingResult<PriceHistoryEntry> {
    validate_create(entry)?;
    let product_key = normalize_key(&entry.product_name);
    let unit = normalize_key(&entry.unit);
    let recorded = price_history::insert(
        conn,
        NewPriceEntry {
            product_name: entry.product_name.trim(),
            product_key: &product_key,
            unit: &unit,
            price_type: entry.price_type,
            price: entry.price,
            source: entry.source.trim(),
            source_id: entry.source_id,
            effective_date: entry.effective_date.unwrap_or(now),
        },
    )
    .await?;
    Ok(recorded)
}

/// Mean of the most recent `samples` purchase prices, 4 decimal places
pub(crate) async fn recent_purchase_average(
    conn: &mut SqliteConnection,
    product_key: &str,
    unit_key: &str,
    samples: usize,
) -> PurchasingResult<Option<f64>> {
    let entries = price_history::find_page(
        conn,
        product_key,
        unit_key,
        Some(PriceType::Purchase),
        None,
        samples as i64,
    )
    .await?;
    if entries.is_empty() {
        return Ok(None);
    }
    let sum: rust_decimal::Decimal = entries.iter().map(|e| money::to_decimal(e.price)).sum();
    let average = sum / rust_decimal::Decimal::from(entries.len());
    Ok(Some(money::price_to_f64(average)))
}

/// Keyset cursor behind [`PriceHistoryRecorder::history`]
struct HistoryCursor {
    pool: SqlitePool,
    product_key: String,
    unit: String,
    price_type: Option<PriceType>,
    before: Option<HistoryPosition>,
    remaining: usize,
    buffer: VecDeque<PriceHistoryEntry>,
    exhausted: bool,
}

impl HistoryCursor {
    async fn next_entry(mut self) -> PurchasingResult<Option<(PriceHistoryEntry, Self)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.buffer.is_empty() && !self.exhausted {
            let page_size = self.remaining.min(PAGE_SIZE);
            let mut conn = self.pool.acquire().await?;
            let page = price_history::find_page(
                &mut conn,
                &self.product_key,
                &self.unit,
                self.price_type,
                self.before,
                page_size as i64,
            )
            .await?;
            self.exhausted = page.len() < page_size;
            self.buffer = page.into();
        }
        match self.buffer.pop_front() {
            Some(entry) => {
                self.remaining -= 1;
                self.before = Some(entry.position());
                Ok(Some((entry, self)))
            }
            None => Ok(None),
        }
    }
}

#[derive(Clone)]
pub struct PriceHistoryRecorder {
    pool: SqlitePool,
    clock: SharedClock,
    retry: RetryPolicy,
}

impl PriceHistoryRecorder {
    pub fn new(pool: SqlitePool, clock: SharedClock) -> Self {
        Self {
            pool,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn record(&self, entry: PriceHistoryCreate) -> PurchasingResult<PriceHistoryEntry> {
        validate_create(&entry)?;
        let entry = &entry;
        let recorded = with_busy_retry(&self.retry, "record_price", move || async move {
            let mut conn = self.pool.acquire().await?;
            record_on(&mut conn, entry, self.clock.now_millis()).await
        })
        .await?;

        tracing::debug!(
            entry_id = recorded.id,
            product = %recorded.product_key,
            price_type = %recorded.price_type,
            price = recorded.price,
            "Price recorded"
        );
        Ok(recorded)
    }

    /// Newest entry; `scope_id` restricts to one source (e.g. one purchase)
    pub async fn latest(
        &self,
        product_name: &str,
        unit: &str,
        price_type: PriceType,
        scope_id: Option<i64>,
    ) -> PurchasingResult<Option<PriceHistoryEntry>> {
        let mut conn = self.pool.acquire().await?;
        let entry = price_history::find_latest(
            &mut conn,
            &normalize_key(product_name),
            &normalize_key(unit),
            price_type,
            scope_id,
        )
        .await?;
        Ok(entry)
    }

    /// Lazy, finite history newest first (ties by id desc).
    ///
    /// Yields at most `query.limit` entries, fetching pages on demand. Passing
    /// the position of the last entry seen as `query.before` resumes the scan.
    pub fn history(&self, query: HistoryQuery) -> BoxStream<'static, PurchasingResult<PriceHistoryEntry>> {
        let cursor = HistoryCursor {
            pool: self.pool.clone(),
            product_key: normalize_key(&query.product_name),
            unit: normalize_key(&query.unit),
            price_type: query.price_type,
            before: query.before,
            remaining: query.limit,
            buffer: VecDeque::new(),
            exhausted: false,
        };
        stream::try_unfold(cursor, HistoryCursor::next_entry).boxed()
    }

    /// Movement across the `samples` most recent prices
    pub async fn trend(
        &self,
        product_name: &str,
        unit: &str,
        price_type: PriceType,
        samples: usize,
    ) -> PurchasingResult<PriceTrend> {
        let mut conn = self.pool.acquire().await?;
        let entries = price_history::find_page(
            &mut conn,
            &normalize_key(product_name),
            &normalize_key(unit),
            Some(price_type),
            None,
            samples.max(1) as i64,
        )
        .await?;

        let (Some(latest), Some(oldest)) = (entries.first(), entries.last()) else {
            return Err(PurchasingError::PriceHistoryEmpty {
                product: product_name.trim().to_string(),
                unit: unit.trim().to_string(),
                price_type,
            });
        };

        let sum: rust_decimal::Decimal = entries.iter().map(|e| money::to_decimal(e.price)).sum();
        let average = sum / rust_decimal::Decimal::from(entries.len());
        let change = money::to_decimal(latest.price) - money::to_decimal(oldest.price);
        let change_percent = change
            .checked_div(money::to_decimal(oldest.price))
            .map(|ratio| money::to_f64(ratio * rust_decimal::Decimal::ONE_HUNDRED));

        Ok(PriceTrend {
            product_name: latest.product_name.clone(),
            unit: latest.unit.clone(),
            price_type,
            samples: entries.len(),
            oldest: oldest.price,
            latest: latest.price,
            average: money::price_to_f64(average),
            change: money::price_to_f64(change),
            change_percent,
        })
    }

    /// Latest sale price against latest purchase price
    pub async fn margin(&self, product_name: &str, unit: &str) -> PurchasingResult<PriceMargin> {
        let missing = |price_type: PriceType| PurchasingError::PriceHistoryEmpty {
            product: product_name.trim().to_string(),
            unit: unit.trim().to_string(),
            price_type,
        };
        let purchase = self
            .latest(product_name, unit, PriceType::Purchase, None)
            .await?
            .ok_or_else(|| missing(PriceType::Purchase))?;
        let sale = self
            .latest(product_name, unit, PriceType::Sale, None)
            .await?
            .ok_or_else(|| missing(PriceType::Sale))?;

        let margin = money::to_decimal(sale.price) - money::to_decimal(purchase.price);
        let margin_percent = margin
            .checked_div(money::to_decimal(sale.price))
            .map(|ratio| money::to_f64(ratio * rust_decimal::Decimal::ONE_HUNDRED));

        Ok(PriceMargin {
            product_name: sale.product_name,
            unit: sale.unit,
            purchase_price: purchase.price,
            sale_price: sale.price,
            margin: money::price_to_f64(margin),
            margin_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::db::open_in_memory;
    use crate::services::ManualClock;
    use futures::TryStreamExt;
    use std::sync::Arc;

    async fn recorder() -> PriceHistoryRecorder {
        let pool = open_in_memory().await.unwrap();
        PriceHistoryRecorder::new(pool, Arc::new(ManualClock::new(50_000)))
    }

    fn fact(price_type: PriceType, price: f64, day: i64) -> PriceHistoryCreate {
        PriceHistoryCreate {
            product_name: "Potato".into(),
            unit: "kg".into(),
            price_type,
            price,
            source: "manual".into(),
            source_id: Some(day),
            effective_date: Some(day * 1_000),
        }
    }

    fn query(limit: usize, before: Option<HistoryPosition>) -> HistoryQuery {
        HistoryQuery {
            product_name: "potato".into(),
            unit: "KG".into(),
            price_type: None,
            limit,
            before,
        }
    }

    #[tokio::test]
    async fn test_record_normalizes_and_defaults_date() {
        let recorder = recorder().await;
        let mut entry = fact(PriceType::Purchase, 35.0, 1);
        entry.product_name = "  Potato   Red ".into();
        entry.unit = " KG".into();
        entry.effective_date = None;

        let recorded = recorder.record(entry).await.unwrap();
        assert_eq!(recorded.product_name, "Potato   Red");
        assert_eq!(recorded.product_key, "potato red");
        assert_eq!(recorded.unit, "kg");
        assert_eq!(recorded.effective_date, 50_000);
    }

    #[tokio::test]
    async fn test_record_validates() {
        let recorder = recorder().await;
        let err = recorder
            .record(fact(PriceType::Purchase, -1.0, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let mut nameless = fact(PriceType::Purchase, 1.0, 1);
        nameless.product_name = " ".into();
        assert!(recorder.record(nameless).await.is_err());
    }

    #[tokio::test]
    async fn test_latest_and_scope() {
        let recorder = recorder().await;
        recorder.record(fact(PriceType::Purchase, 30.0, 1)).await.unwrap();
        recorder.record(fact(PriceType::Purchase, 36.0, 2)).await.unwrap();

        let latest = recorder
            .latest("POTATO", "kg", PriceType::Purchase, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.price, 36.0);

        let scoped = recorder
            .latest("potato", "kg", PriceType::Purchase, Some(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scoped.price, 30.0);
        assert!(recorder
            .latest("potato", "kg", PriceType::Sale, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_history_is_finite_and_restartable() {
        let recorder = recorder().await;
        for day in 1..=5 {
            recorder
                .record(fact(PriceType::Purchase, day as f64, day))
                .await
                .unwrap();
        }
        // same date as day 5, later id
        recorder.record(fact(PriceType::Sale, 9.0, 5)).await.unwrap();

        let first: Vec<_> = recorder.history(query(3, None)).try_collect().await.unwrap();
        assert_eq!(
            first.iter().map(|e| e.price).collect::<Vec<_>>(),
            vec![9.0, 5.0, 4.0]
        );

        let resume = first.last().map(|e| e.position());
        let rest: Vec<_> = recorder.history(query(10, resume)).try_collect().await.unwrap();
        assert_eq!(
            rest.iter().map(|e| e.price).collect::<Vec<_>>(),
            vec![3.0, 2.0, 1.0]
        );

        let empty: Vec<_> = recorder.history(query(0, None)).try_collect().await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_history_filters_price_type() {
        let recorder = recorder().await;
        recorder.record(fact(PriceType::Purchase, 1.0, 1)).await.unwrap();
        recorder.record(fact(PriceType::Sale, 2.0, 2)).await.unwrap();

        let mut q = query(10, None);
        q.price_type = Some(PriceType::Purchase);
        let only: Vec<_> = recorder.history(q).try_collect().await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].price_type, PriceType::Purchase);
    }

    #[tokio::test]
    async fn test_trend() {
        let recorder = recorder().await;
        for (day, price) in [(1, 30.0), (2, 33.0), (3, 36.0)] {
            recorder
                .record(fact(PriceType::Purchase, price, day))
                .await
                .unwrap();
        }

        let trend = recorder
            .trend("potato", "kg", PriceType::Purchase, 10)
            .await
            .unwrap();
        assert_eq!(trend.samples, 3);
        assert_eq!(trend.oldest, 30.0);
        assert_eq!(trend.latest, 36.0);
        assert_eq!(trend.average, 33.0);
        assert_eq!(trend.change, 6.0);
        assert_eq!(trend.change_percent, Some(20.0));

        let err = recorder
            .trend("carrot", "kg", PriceType::Purchase, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchasingError::PriceHistoryEmpty { .. }));
    }

    #[tokio::test]
    async fn test_margin() {
        let recorder = recorder().await;
        recorder.record(fact(PriceType::Purchase, 35.0, 1)).await.unwrap();
        assert!(recorder.margin("potato", "kg").await.is_err());

        recorder.record(fact(PriceType::Sale, 50.0, 2)).await.unwrap();
        let margin = recorder.margin("potato", "kg").await.unwrap();
        assert_eq!(margin.margin, 15.0);
        assert_eq!(margin.margin_percent, Some(30.0));
    }
}
