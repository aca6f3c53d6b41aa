//! Back-office facade: the surface UI callers wire against.
//!
//! One `Backoffice` is constructed per process over a record store and
//! passed by reference; it owns no ambient state of its own. Live order
//! subscriptions run as background tasks and stop when their handle is
//! dropped or `unsubscribe()` is called — torn down, not drained.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::{Catalog, DiscountView, StockMetrics};
use crate::dispatch;
use crate::error::Result;
use crate::live::{fetch_order_views, run_board, BoardCommand, FeedFilter};
use crate::model::{Customer, Product};
use crate::projection::OrderView;
use crate::status::{OrderStatus, PaymentStatus};
use crate::stock::{self, StockLevel};
use crate::store::RecordStore;

/// Handle for a live order subscription. Dropping it (or calling
/// [`unsubscribe`](OrdersSubscription::unsubscribe)) cancels the feed task.
pub struct OrdersSubscription {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<BoardCommand>,
    task: JoinHandle<()>,
}

impl OrdersSubscription {
    /// Optimistically remove an order from this subscription's view without
    /// waiting for the remote event — e.g. dropping an order from a pending
    /// queue the moment the user clicks Process.
    pub fn retract(&self, order_id: &str) {
        let _ = self
            .commands
            .send(BoardCommand::Retract(order_id.to_string()));
    }

    /// Whether the feed task is still running.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Tear the subscription down.
    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}

impl Drop for OrdersSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct Backoffice {
    store: Arc<dyn RecordStore>,
    catalog: Catalog,
}

impl Backoffice {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Backoffice {
            catalog: Catalog::new(store.clone()),
            store,
        }
    }

    // -- Orders --------------------------------------------------------------

    /// Initial bulk load of order view models, newest first.
    pub async fn list_orders(&self, filter: &FeedFilter) -> Result<Vec<OrderView>> {
        fetch_order_views(self.store.as_ref(), filter).await
    }

    /// Start a live order view. `on_change` receives the full snapshot after
    /// the initial load and after every visible change.
    pub fn subscribe_orders(
        &self,
        filter: FeedFilter,
        on_change: impl Fn(&[OrderView]) + Send + Sync + 'static,
    ) -> OrdersSubscription {
        let cancel = CancellationToken::new();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_board(
            self.store.clone(),
            filter,
            Box::new(on_change),
            command_rx,
            cancel.clone(),
        ));
        debug!("order subscription started");
        OrdersSubscription {
            cancel,
            commands,
            task,
        }
    }

    pub async fn transition_order(&self, order_id: &str, new_status: OrderStatus) -> Result<()> {
        dispatch::transition(self.store.as_ref(), order_id, new_status).await
    }

    pub async fn set_payment_status(
        &self,
        order_id: &str,
        payment_status: PaymentStatus,
    ) -> Result<()> {
        dispatch::set_payment_status(self.store.as_ref(), order_id, payment_status).await
    }

    pub async fn assign_courier(
        &self,
        order_id: &str,
        courier_id: &str,
        tracking_number: &str,
        shipping_method: &str,
    ) -> Result<()> {
        dispatch::assign_courier(
            self.store.as_ref(),
            order_id,
            courier_id,
            tracking_number,
            shipping_method,
        )
        .await
    }

    // -- Inventory -----------------------------------------------------------

    pub async fn restock_product(&self, product_id: &str, delta: i64) -> Result<StockLevel> {
        stock::apply_delta(self.store.as_ref(), product_id, delta).await
    }

    // -- Catalog -------------------------------------------------------------

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        self.catalog.list_products().await
    }

    pub async fn get_product(&self, id: &str) -> Result<Product> {
        self.catalog.get_product(id).await
    }

    pub async fn stock_metrics(&self) -> Result<StockMetrics> {
        self.catalog.stock_metrics().await
    }

    pub async fn list_discounts(&self) -> Result<Vec<DiscountView>> {
        self.catalog.list_discounts().await
    }

    pub async fn find_discount(&self, code: &str) -> Result<Option<DiscountView>> {
        self.catalog.find_discount(code).await
    }

    pub async fn get_customer(&self, id: &str) -> Result<Customer> {
        self.catalog.get_customer(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tables;
    use crate::status::{Priority, StockStatus};
    use crate::store::SqliteStore;
    use serde_json::json;
    use std::time::Duration;

    fn backoffice() -> Backoffice {
        Backoffice::new(Arc::new(
            SqliteStore::open_in_memory().expect("open store"),
        ))
    }

    fn order_row(id: &str, status: &str, total: f64, created_at: &str) -> serde_json::Value {
        json!({
            "id": id,
            "order_number": format!("ORD-{id}"),
            "status": status,
            "payment_status": "unpaid",
            "total_amount": total,
            "item_count": 1,
            "created_at": created_at,
            "customer_id": "cus-7"
        })
    }

    async fn seed_customer(office: &Backoffice) {
        office
            .store
            .insert(
                tables::CUSTOMERS,
                json!({ "id": "cus-7", "name": "Maria Pappas", "email": "maria@example.com" }),
            )
            .await
            .expect("seed customer");
    }

    /// Await snapshots until `accept` returns true, failing after a timeout.
    async fn wait_for_snapshot(
        rx: &mut mpsc::UnboundedReceiver<Vec<OrderView>>,
        accept: impl Fn(&[OrderView]) -> bool,
    ) -> Vec<OrderView> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = rx.recv().await.expect("subscription alive");
                if accept(&snapshot) {
                    return snapshot;
                }
            }
        })
        .await
        .expect("snapshot within timeout")
    }

    #[tokio::test]
    async fn bulk_load_and_realtime_insert_project_identically() {
        let office = backoffice();
        seed_customer(&office).await;
        office
            .store
            .insert(
                tables::ORDERS,
                order_row("a", "pending", 320.11, "2026-08-01T10:30:00Z"),
            )
            .await
            .expect("insert");

        let loaded = office
            .list_orders(&FeedFilter::all())
            .await
            .expect("list")
            .remove(0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = office.subscribe_orders(FeedFilter::all(), move |snapshot| {
            let _ = tx.send(snapshot.to_vec());
        });
        let snapshot = wait_for_snapshot(&mut rx, |s| !s.is_empty()).await;

        // Identical no matter which path the order entered through.
        assert_eq!(snapshot[0], loaded);
        assert_eq!(snapshot[0].customer, "Maria Pappas");
        assert_eq!(snapshot[0].priority, Priority::Medium);
    }

    #[tokio::test]
    async fn pending_queue_follows_processing_transitions() {
        let office = backoffice();
        seed_customer(&office).await;
        office
            .store
            .insert(
                tables::ORDERS,
                order_row("a", "pending", 120.0, "2026-08-01T10:30:00Z"),
            )
            .await
            .expect("insert");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = office.subscribe_orders(
            FeedFilter::with_status(OrderStatus::Pending),
            move |snapshot| {
                let _ = tx.send(snapshot.to_vec());
            },
        );
        wait_for_snapshot(&mut rx, |s| s.len() == 1).await;

        // A realtime insert lands in the queue...
        office
            .store
            .insert(
                tables::ORDERS,
                order_row("b", "pending", 40.0, "2026-08-01T11:00:00Z"),
            )
            .await
            .expect("insert");
        let snapshot = wait_for_snapshot(&mut rx, |s| s.len() == 2).await;
        assert_eq!(snapshot[0].id, "b");

        // ...and processing an order removes it once the update event fires.
        office
            .transition_order("a", OrderStatus::Processing)
            .await
            .expect("transition");
        let snapshot = wait_for_snapshot(&mut rx, |s| s.len() == 1).await;
        assert_eq!(snapshot[0].id, "b");
    }

    #[tokio::test]
    async fn retract_reflects_immediately_without_a_remote_event() {
        let office = backoffice();
        seed_customer(&office).await;
        office
            .store
            .insert(
                tables::ORDERS,
                order_row("a", "pending", 120.0, "2026-08-01T10:30:00Z"),
            )
            .await
            .expect("insert");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = office.subscribe_orders(
            FeedFilter::with_status(OrderStatus::Pending),
            move |snapshot| {
                let _ = tx.send(snapshot.to_vec());
            },
        );
        wait_for_snapshot(&mut rx, |s| s.len() == 1).await;

        sub.retract("a");
        wait_for_snapshot(&mut rx, |s| s.is_empty()).await;
        assert!(sub.is_active());
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn restock_through_the_facade_returns_the_derived_level() {
        let office = backoffice();
        office
            .store
            .insert(
                tables::PRODUCTS,
                json!({ "id": "prod-1", "name": "Mug", "category": "kitchen", "price": 9.0, "stock": 8 }),
            )
            .await
            .expect("seed product");

        let level = office.restock_product("prod-1", 20).await.expect("restock");
        assert_eq!(level.stock, 28);
        assert_eq!(level.status, StockStatus::InStock);
    }
}
