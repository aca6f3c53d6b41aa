//! backroom - storefront back-office order & inventory core
//!
//! The order lifecycle and inventory consistency layer behind a storefront
//! admin dashboard: the order status machine, the stock ledger that keeps a
//! product's stock and derived status consistent, the projection from raw
//! order rows to view models, and the live reconciler that keeps an
//! in-memory order view in step with a remote table's change feed.
//!
//! The remote table lives behind the [`store::RecordStore`] contract; two
//! backends ship with the crate (in-process SQLite, hosted REST service).
//! UI callers wire against [`service::Backoffice`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use backroom::{Backoffice, FeedFilter, OrderStatus, SqliteStore};
//!
//! # async fn demo() -> backroom::Result<()> {
//! let store = Arc::new(SqliteStore::open(std::path::Path::new("./data"))?);
//! let office = Backoffice::new(store);
//!
//! let pending = office.subscribe_orders(
//!     FeedFilter::with_status(OrderStatus::Pending).latest(5),
//!     |orders| println!("{} pending orders", orders.len()),
//! );
//!
//! office.transition_order("ord-1042", OrderStatus::Processing).await?;
//! pending.retract("ord-1042");
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod live;
pub mod model;
pub mod projection;
pub mod service;
pub mod status;
pub mod stock;
pub mod store;

pub use catalog::{Catalog, DiscountView, StockMetrics};
pub use error::{Error, Result};
pub use live::{FeedFilter, OrderBoard};
pub use model::{Customer, Discount, Order, Product};
pub use projection::{project_order, OrderView, UNKNOWN_CUSTOMER};
pub use service::{Backoffice, OrdersSubscription};
pub use status::{
    classify_stock, discount_status, priority_of, DiscountKind, DiscountStatus, OrderStatus,
    PaymentStatus, Priority, StockStatus, LOW_STOCK_THRESHOLD,
};
pub use stock::{apply_delta, StockLevel};
pub use store::{
    ChangeEvent, EventKind, Join, Query, RecordStore, RestStore, SortDir, SqliteStore,
};
