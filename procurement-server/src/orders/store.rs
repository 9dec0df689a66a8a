//! OrderStore - order CRUD and lifecycle transitions
//!
//! Every write is one transaction run under the busy-retry policy. Status
//! changes notify the order's creator after commit.

use shared::models::{
    Order, OrderCreate, OrderDetail, OrderFilter, OrderLineInput, OrderLineItem, OrderLineUpdate,
    OrderStatus,
};
use sqlx::{SqliteConnection, SqlitePool};

use super::{aggregator, money};
use crate::core::error::{PurchasingError, PurchasingResult};
use crate::db::repository::{RepoError, order, order_item};
use crate::db::{RetryPolicy, with_busy_retry};
use crate::services::{SharedClock, SharedNotifier, notify_quietly};

/// Largest page served by `list_orders`
pub const MAX_PAGE_SIZE: i64 = 500;

/// Load an order with its lines
pub(crate) async fn load_detail(
    conn: &mut SqliteConnection,
    order_id: i64,
) -> PurchasingResult<OrderDetail> {
    let order = order::find_by_id(conn, order_id)
        .await?
        .ok_or(PurchasingError::OrderNotFound(order_id))?;
    let items = order_item::find_by_order(conn, order_id).await?;
    Ok(OrderDetail { order, items })
}

async fn load_order(conn: &mut SqliteConnection, order_id: i64) -> PurchasingResult<Order> {
    order::find_by_id(conn, order_id)
        .await?
        .ok_or(PurchasingError::OrderNotFound(order_id))
}

/// Line of `order_id`, `ItemNotFound` when it belongs elsewhere
async fn load_item(
    conn: &mut SqliteConnection,
    order_id: i64,
    item_id: i64,
) -> PurchasingResult<OrderLineItem> {
    order_item::find_by_id(conn, item_id)
        .await?
        .filter(|item| item.order_id == order_id)
        .ok_or(PurchasingError::ItemNotFound(item_id))
}

fn require_lines_editable(order: &Order) -> PurchasingResult<()> {
    if !order.status.lines_editable() {
        return Err(PurchasingError::ImmutableOrder {
            order_id: order.id,
            status: order.status,
        });
    }
    Ok(())
}

fn status_message(order: &Order, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("Order #{} is now {}: {}", order.id, order.status, reason),
        None => format!("Order #{} is now {}", order.id, order.status),
    }
}

#[derive(Clone)]
pub struct OrderStore {
    pool: SqlitePool,
    clock: SharedClock,
    notifier: SharedNotifier,
    retry: RetryPolicy,
}

impl OrderStore {
    pub fn new(pool: SqlitePool, clock: SharedClock, notifier: SharedNotifier) -> Self {
        Self {
            pool,
            clock,
            notifier,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ========== Reads ==========

    pub async fn get_order_by_id(&self, order_id: i64) -> PurchasingResult<OrderDetail> {
        let mut conn = self.pool.acquire().await?;
        load_detail(&mut conn, order_id).await
    }

    pub async fn list_orders(
        &self,
        filter: &OrderFilter,
        limit: i64,
        offset: i64,
    ) -> PurchasingResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let orders = order::find_all(
            &mut conn,
            filter,
            limit.clamp(1, MAX_PAGE_SIZE),
            offset.max(0),
        )
        .await?;
        Ok(orders)
    }

    // ========== Draft editing ==========

    pub async fn create_order(&self, data: OrderCreate) -> PurchasingResult<OrderDetail> {
        for item in &data.items {
            money::validate_line_input(item)?;
        }
        let data = &data;
        let detail = with_busy_retry(&self.retry, "create_order", move || {
            self.create_order_once(data)
        })
        .await?;

        tracing::info!(
            order_id = detail.order.id,
            restaurant_id = detail.order.restaurant_id,
            lines = detail.items.len(),
            "Order created"
        );
        Ok(detail)
    }

    async fn create_order_once(&self, data: &OrderCreate) -> PurchasingResult<OrderDetail> {
        let now = self.clock.now_millis();
        let mut tx = self.pool.begin().await?;

        let order_id = order::insert(
            &mut tx,
            data.restaurant_id,
            data.created_by,
            data.manager_comment.as_deref(),
            now,
        )
        .await?;
        for item in &data.items {
            insert_line(&mut tx, order_id, item).await?;
        }
        aggregator::recalculate(&mut tx, order_id, now).await?;

        let detail = load_detail(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(detail)
    }

    pub async fn add_item(
        &self,
        order_id: i64,
        item: OrderLineInput,
    ) -> PurchasingResult<OrderDetail> {
        money::validate_line_input(&item)?;
        let item = &item;
        with_busy_retry(&self.retry, "add_item", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;

            let order = load_order(&mut tx, order_id).await?;
            require_lines_editable(&order)?;
            insert_line(&mut tx, order_id, item).await?;
            aggregator::recalculate(&mut tx, order_id, now).await?;

            let detail = load_detail(&mut tx, order_id).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    pub async fn update_item(
        &self,
        order_id: i64,
        item_id: i64,
        changes: OrderLineUpdate,
    ) -> PurchasingResult<OrderDetail> {
        money::validate_line_update(&changes)?;
        let changes = &changes;
        with_busy_retry(&self.retry, "update_item", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;

            let order = load_order(&mut tx, order_id).await?;
            require_lines_editable(&order)?;
            let mut item = load_item(&mut tx, order_id, item_id).await?;

            if let Some(name) = &changes.product_name {
                item.product_name = name.trim().to_string();
            }
            if let Some(unit) = &changes.unit {
                item.unit = unit.trim().to_string();
            }
            if let Some(quantity) = changes.quantity {
                item.quantity = quantity;
            }
            if let Some(price) = changes.price {
                item.price = Some(price);
            }
            item.total = item.price.map(|p| money::line_total(item.quantity, p));

            order_item::update(&mut tx, &item).await?;
            aggregator::recalculate(&mut tx, order_id, now).await?;

            let detail = load_detail(&mut tx, order_id).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    pub async fn remove_item(&self, order_id: i64, item_id: i64) -> PurchasingResult<OrderDetail> {
        with_busy_retry(&self.retry, "remove_item", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;

            let order = load_order(&mut tx, order_id).await?;
            require_lines_editable(&order)?;
            load_item(&mut tx, order_id, item_id).await?;
            order_item::delete(&mut tx, item_id).await?;
            aggregator::recalculate(&mut tx, order_id, now).await?;

            let detail = load_detail(&mut tx, order_id).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    /// Staff pricing, allowed while the order is processing or purchased
    pub async fn set_item_price(
        &self,
        order_id: i64,
        item_id: i64,
        price: f64,
    ) -> PurchasingResult<OrderDetail> {
        money::validate_price(price, "price")?;
        with_busy_retry(&self.retry, "set_item_price", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;

            let order = load_order(&mut tx, order_id).await?;
            if !order.status.prices_editable() {
                return Err(PurchasingError::ImmutableOrder {
                    order_id,
                    status: order.status,
                });
            }
            let item = load_item(&mut tx, order_id, item_id).await?;
            let total = money::line_total(item.quantity, price);
            order_item::set_price(&mut tx, item_id, price, total).await?;
            aggregator::recalculate(&mut tx, order_id, now).await?;

            let detail = load_detail(&mut tx, order_id).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    pub async fn set_manager_comment(
        &self,
        order_id: i64,
        comment: Option<String>,
    ) -> PurchasingResult<Order> {
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let comment = comment.as_deref();
        with_busy_retry(&self.retry, "set_manager_comment", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;
            order::set_manager_comment(&mut tx, order_id, comment, now)
                .await
                .map_err(|e| match e {
                    RepoError::NotFound(_) => PurchasingError::OrderNotFound(order_id),
                    other => other.into(),
                })?;
            let order = load_order(&mut tx, order_id).await?;
            tx.commit().await?;
            Ok(order)
        })
        .await
    }

    /// Drafts may be deleted; anything sent is kept forever
    pub async fn delete_draft(&self, order_id: i64) -> PurchasingResult<()> {
        with_busy_retry(&self.retry, "delete_draft", move || async move {
            let mut tx = self.pool.begin().await?;
            let order = load_order(&mut tx, order_id).await?;
            require_lines_editable(&order)?;
            order::delete_draft(&mut tx, order_id).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;

        tracing::info!(order_id, "Draft order deleted");
        Ok(())
    }

    // ========== Lifecycle ==========

    /// Apply one lifecycle transition and stamp its timestamp/actor
    pub async fn update_status(
        &self,
        order_id: i64,
        new_status: OrderStatus,
        actor_id: i64,
        reason: Option<String>,
    ) -> PurchasingResult<Order> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if new_status == OrderStatus::Rejected && reason.is_none() {
            return Err(PurchasingError::Validation(
                "A rejection reason is required".into(),
            ));
        }
        let reason = reason.as_deref();

        let order = with_busy_retry(&self.retry, "update_order_status", move || async move {
            let now = self.clock.now_millis();
            let mut tx = self.pool.begin().await?;

            let current = load_order(&mut tx, order_id).await?;
            if !current.status.can_transition_to(new_status) {
                return Err(PurchasingError::InvalidOrderTransition {
                    order_id,
                    from: current.status,
                    to: new_status,
                });
            }
            if new_status == OrderStatus::Sent
                && order_item::count_by_order(&mut tx, order_id).await? == 0
            {
                return Err(PurchasingError::OrderEmpty(order_id));
            }

            order::update_status(
                &mut tx,
                order_id,
                current.status,
                new_status,
                actor_id,
                reason,
                now,
            )
            .await?;

            let order = load_order(&mut tx, order_id).await?;
            tx.commit().await?;
            Ok(order)
        })
        .await?;

        tracing::info!(
            order_id,
            status = %order.status,
            actor_id,
            "Order status updated"
        );
        notify_quietly(
            self.notifier.as_ref(),
            order.created_by,
            &status_message(&order, reason),
        )
        .await;
        Ok(order)
    }
}

async fn insert_line(
    conn: &mut SqliteConnection,
    order_id: i64,
    item: &OrderLineInput,
) -> PurchasingResult<i64> {
    let total = item.price.map(|p| money::line_total(item.quantity, p));
    let id = order_item::insert(
        conn,
        order_id,
        item.product_name.trim(),
        item.unit.trim(),
        item.quantity,
        item.price,
        total,
    )
    .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::db::open_in_memory;
    use crate::services::{ManualClock, RecordingNotifier};
    use std::sync::Arc;

    struct Harness {
        store: OrderStore,
        clock: ManualClock,
        notifier: RecordingNotifier,
    }

    async fn harness() -> Harness {
        let pool = open_in_memory().await.unwrap();
        let clock = ManualClock::new(1_000_000);
        let notifier = RecordingNotifier::new();
        let store = OrderStore::new(pool, Arc::new(clock.clone()), Arc::new(notifier.clone()));
        Harness {
            store,
            clock,
            notifier,
        }
    }

    fn line(name: &str, quantity: f64) -> OrderLineInput {
        OrderLineInput {
            product_name: name.into(),
            unit: "kg".into(),
            quantity,
            price: None,
        }
    }

    fn create(items: Vec<OrderLineInput>) -> OrderCreate {
        OrderCreate {
            restaurant_id: 1,
            created_by: 77,
            items,
            manager_comment: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let h = harness().await;
        let mut priced = line("Tomato", 2.5);
        priced.price = Some(1.99);
        let detail = h
            .store
            .create_order(create(vec![line(" Potato ", 10.0), priced]))
            .await
            .unwrap();

        assert_eq!(detail.order.status, OrderStatus::Draft);
        assert_eq!(detail.items.len(), 2);
        assert_eq!(detail.items[0].product_name, "Potato");
        assert_eq!(detail.items[1].total, Some(4.98));
        assert_eq!(detail.order.total_amount, 4.98);

        let loaded = h.store.get_order_by_id(detail.order.id).await.unwrap();
        assert_eq!(loaded.items, detail.items);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_lines() {
        let h = harness().await;
        let err = h
            .store
            .create_order(create(vec![line("Potato", 0.0)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(h
            .store
            .list_orders(&OrderFilter::default(), 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_full_lifecycle_stamps_every_transition() {
        let h = harness().await;
        let id = h
            .store
            .create_order(create(vec![line("Potato", 10.0)]))
            .await
            .unwrap()
            .order
            .id;

        let steps = [
            (OrderStatus::Sent, 77),
            (OrderStatus::Processing, 2),
            (OrderStatus::Approved, 3),
            (OrderStatus::Purchased, 4),
            (OrderStatus::Completed, 5),
        ];
        for (status, actor) in steps {
            h.clock.advance(1_000);
            let order = h.store.update_status(id, status, actor, None).await.unwrap();
            assert_eq!(order.status, status);
        }

        let order = h.store.get_order_by_id(id).await.unwrap().order;
        assert_eq!(order.sent_by, Some(77));
        assert_eq!(order.sent_at, Some(1_001_000));
        assert_eq!(order.processing_by, Some(2));
        assert_eq!(order.approved_by, Some(3));
        assert_eq!(order.purchased_by, Some(4));
        assert_eq!(order.completed_by, Some(5));
        assert_eq!(order.completed_at, Some(1_005_000));

        // creator hears about every change
        assert_eq!(h.notifier.sent_to(77).len(), 5);
        assert!(h.notifier.sent_to(77)[4].contains("COMPLETED"));
    }

    #[tokio::test]
    async fn test_illegal_and_repeated_transitions() {
        let h = harness().await;
        let id = h
            .store
            .create_order(create(vec![line("Potato", 10.0)]))
            .await
            .unwrap()
            .order
            .id;

        let err = h
            .store
            .update_status(id, OrderStatus::Approved, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        h.store.update_status(id, OrderStatus::Sent, 1, None).await.unwrap();
        let err = h
            .store
            .update_status(id, OrderStatus::Sent, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PurchasingError::InvalidOrderTransition {
                from: OrderStatus::Sent,
                to: OrderStatus::Sent,
                ..
            }
        ));

        let err = h
            .store
            .update_status(id + 100, OrderStatus::Sent, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let h = harness().await;
        let id = h
            .store
            .create_order(create(vec![line("Potato", 10.0)]))
            .await
            .unwrap()
            .order
            .id;
        h.store.update_status(id, OrderStatus::Sent, 77, None).await.unwrap();
        h.store
            .update_status(id, OrderStatus::Processing, 2, None)
            .await
            .unwrap();

        let err = h
            .store
            .update_status(id, OrderStatus::Rejected, 2, Some("  ".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let order = h
            .store
            .update_status(id, OrderStatus::Rejected, 2, Some("over budget".into()))
            .await
            .unwrap();
        assert_eq!(order.rejection_reason.as_deref(), Some("over budget"));
        assert_eq!(order.rejected_by, Some(2));
        assert!(h.notifier.sent_to(77)[2].contains("over budget"));
    }

    #[tokio::test]
    async fn test_cannot_send_empty_order() {
        let h = harness().await;
        let id = h.store.create_order(create(vec![])).await.unwrap().order.id;
        let err = h
            .store
            .update_status(id, OrderStatus::Sent, 77, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchasingError::OrderEmpty(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_lines_frozen_after_send() {
        let h = harness().await;
        let detail = h
            .store
            .create_order(create(vec![line("Potato", 10.0)]))
            .await
            .unwrap();
        let id = detail.order.id;
        let item_id = detail.items[0].id;

        let detail = h.store.add_item(id, line("Onion", 2.0)).await.unwrap();
        assert_eq!(detail.items.len(), 2);
        let detail = h
            .store
            .update_item(
                id,
                item_id,
                OrderLineUpdate {
                    quantity: Some(12.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(detail.items[0].quantity, 12.0);

        h.store.update_status(id, OrderStatus::Sent, 77, None).await.unwrap();

        let err = h.store.add_item(id, line("Salt", 1.0)).await.unwrap_err();
        assert!(matches!(
            err,
            PurchasingError::ImmutableOrder {
                status: OrderStatus::Sent,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(h.store.remove_item(id, item_id).await.is_err());
        assert!(h.store.delete_draft(id).await.is_err());
        assert_eq!(h.store.get_order_by_id(id).await.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn test_item_must_belong_to_order() {
        let h = harness().await;
        let a = h
            .store
            .create_order(create(vec![line("Potato", 10.0)]))
            .await
            .unwrap();
        let b = h
            .store
            .create_order(create(vec![line("Onion", 1.0)]))
            .await
            .unwrap();

        let err = h
            .store
            .remove_item(a.order.id, b.items[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchasingError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn test_staff_pricing_only_while_processing_or_purchased() {
        let h = harness().await;
        let detail = h
            .store
            .create_order(create(vec![line("Potato", 10.0), line("Onion", 4.0)]))
            .await
            .unwrap();
        let id = detail.order.id;
        let potato = detail.items[0].id;
        let onion = detail.items[1].id;

        h.store.update_status(id, OrderStatus::Sent, 77, None).await.unwrap();
        let err = h.store.set_item_price(id, potato, 3.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        h.store
            .update_status(id, OrderStatus::Processing, 2, None)
            .await
            .unwrap();
        h.store.set_item_price(id, potato, 3.0).await.unwrap();
        let detail = h.store.set_item_price(id, onion, 1.25).await.unwrap();
        assert_eq!(detail.items[0].total, Some(30.0));
        assert_eq!(detail.items[1].total, Some(5.0));
        assert_eq!(detail.order.total_amount, 35.0);

        h.store
            .update_status(id, OrderStatus::Approved, 3, None)
            .await
            .unwrap();
        assert!(h.store.set_item_price(id, potato, 4.0).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_draft_and_comment() {
        let h = harness().await;
        let id = h
            .store
            .create_order(create(vec![line("Potato", 10.0)]))
            .await
            .unwrap()
            .order
            .id;

        let order = h
            .store
            .set_manager_comment(id, Some(" deliver before 9 ".into()))
            .await
            .unwrap();
        assert_eq!(order.manager_comment.as_deref(), Some("deliver before 9"));

        h.store.delete_draft(id).await.unwrap();
        let err = h.store.get_order_by_id(id).await.unwrap_err();
        assert!(matches!(err, PurchasingError::OrderNotFound(_)));
        assert!(matches!(
            h.store.set_manager_comment(id, None).await,
            Err(PurchasingError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_undo_transition() {
        let pool = open_in_memory().await.unwrap();
        let store = OrderStore::new(
            pool,
            Arc::new(ManualClock::new(1_000)),
            Arc::new(RecordingNotifier::failing()),
        );
        let id = store
            .create_order(create(vec![line("Potato", 10.0)]))
            .await
            .unwrap()
            .order
            .id;

        store.update_status(id, OrderStatus::Sent, 77, None).await.unwrap();
        assert_eq!(
            store.get_order_by_id(id).await.unwrap().order.status,
            OrderStatus::Sent
        );
    }
}
