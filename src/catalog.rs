//! Catalog repository: products, discounts, and customers behind one
//! explicit service object.
//!
//! Replaces the reference dashboard's ambient context providers — there is
//! no global mutable collection here. A `Catalog` is constructed once per
//! process over the record store and passed by reference to whoever needs
//! it. Discount statuses are derived on every read, never stored.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{tables, Customer, Discount, Product};
use crate::status::{classify_stock, DiscountStatus, StockStatus};
use crate::store::{Query, RecordStore, SortDir};

/// Inventory widget counts: how many products sit in each stock bucket.
/// Buckets partition the catalog, so the three counts sum to `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMetrics {
    pub total: usize,
    pub in_stock: usize,
    pub low_stock: usize,
    pub out_of_stock: usize,
}

/// A discount together with its status at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountView {
    #[serde(flatten)]
    pub discount: Discount,
    pub status: DiscountStatus,
}

pub struct Catalog {
    store: Arc<dyn RecordStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Catalog { store }
    }

    fn parse_rows<T>(rows: Vec<Value>, table: &str, parse: fn(&Value) -> Result<T>) -> Vec<T> {
        rows.iter()
            .filter_map(|row| match parse(row) {
                Ok(parsed) => Some(parsed),
                Err(error) => {
                    warn!(table = table, error = %error, "skipping unparsable row");
                    None
                }
            })
            .collect()
    }

    // -- Products ------------------------------------------------------------

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = self
            .store
            .list(
                tables::PRODUCTS,
                &Query::new().order_by("name", SortDir::Asc),
            )
            .await?;
        Ok(Self::parse_rows(rows, tables::PRODUCTS, Product::from_record))
    }

    pub async fn get_product(&self, id: &str) -> Result<Product> {
        let record = self
            .store
            .get(tables::PRODUCTS, id)
            .await?
            .ok_or_else(|| Error::not_found(tables::PRODUCTS, id))?;
        Product::from_record(&record)
    }

    /// Stock counts for the dashboard inventory widget. Statuses are derived
    /// from the stock counts here, not read from the stored column, so the
    /// widget can never disagree with the ledger's classification.
    pub async fn stock_metrics(&self) -> Result<StockMetrics> {
        let products = self.list_products().await?;
        let mut metrics = StockMetrics {
            total: products.len(),
            in_stock: 0,
            low_stock: 0,
            out_of_stock: 0,
        };
        for product in &products {
            match classify_stock(product.stock) {
                StockStatus::InStock => metrics.in_stock += 1,
                StockStatus::LowStock => metrics.low_stock += 1,
                StockStatus::OutOfStock => metrics.out_of_stock += 1,
            }
        }
        Ok(metrics)
    }

    // -- Discounts -----------------------------------------------------------

    pub async fn list_discounts(&self) -> Result<Vec<DiscountView>> {
        let rows = self
            .store
            .list(
                tables::DISCOUNTS,
                &Query::new().order_by("starts_at", SortDir::Desc),
            )
            .await?;
        let now = Utc::now();
        Ok(
            Self::parse_rows(rows, tables::DISCOUNTS, Discount::from_record)
                .into_iter()
                .map(|discount| DiscountView {
                    status: discount.status_at(now),
                    discount,
                })
                .collect(),
        )
    }

    /// Look a discount up by code, case-insensitively (codes are normalized
    /// upper-case).
    pub async fn find_discount(&self, code: &str) -> Result<Option<DiscountView>> {
        let wanted = code.trim().to_uppercase();
        if wanted.is_empty() {
            return Ok(None);
        }
        Ok(self
            .list_discounts()
            .await?
            .into_iter()
            .find(|view| view.discount.code == wanted))
    }

    // -- Customers -----------------------------------------------------------

    pub async fn get_customer(&self, id: &str) -> Result<Customer> {
        let record = self
            .store
            .get(tables::CUSTOMERS, id)
            .await?
            .ok_or_else(|| Error::not_found(tables::CUSTOMERS, id))?;
        Customer::from_record(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;

    async fn seeded_catalog() -> Catalog {
        let store = SqliteStore::open_in_memory().expect("open store");
        for (id, name, stock) in [
            ("p1", "Candle", 25),
            ("p2", "Mug", 7),
            ("p3", "Notebook", 0),
            ("p4", "Tote Bag", 3),
        ] {
            store
                .insert(
                    tables::PRODUCTS,
                    json!({ "id": id, "name": name, "category": "home", "price": 9.0, "stock": stock }),
                )
                .await
                .expect("seed product");
        }
        store
            .insert(
                tables::DISCOUNTS,
                json!({
                    "id": "d1",
                    "code": "welcome10",
                    "type": "percentage",
                    "value": 10.0,
                    "starts_at": "2020-01-01T00:00:00Z"
                }),
            )
            .await
            .expect("seed discount");
        store
            .insert(
                tables::DISCOUNTS,
                json!({
                    "id": "d2",
                    "code": "LAUNCH2099",
                    "type": "fixed",
                    "value": 15.0,
                    "starts_at": "2099-01-01T00:00:00Z"
                }),
            )
            .await
            .expect("seed discount");
        store
            .insert(
                tables::CUSTOMERS,
                json!({
                    "id": "cus-7",
                    "name": "Maria Pappas",
                    "email": "maria@example.com",
                    "total_orders": 12,
                    "total_spent": 1480.5
                }),
            )
            .await
            .expect("seed customer");
        Catalog::new(Arc::new(store))
    }

    #[tokio::test]
    async fn stock_metrics_partition_the_catalog() {
        let catalog = seeded_catalog().await;
        let metrics = catalog.stock_metrics().await.expect("metrics");
        assert_eq!(metrics.total, 4);
        assert_eq!(metrics.in_stock, 1);
        assert_eq!(metrics.low_stock, 2);
        assert_eq!(metrics.out_of_stock, 1);
        assert_eq!(
            metrics.in_stock + metrics.low_stock + metrics.out_of_stock,
            metrics.total
        );
    }

    #[tokio::test]
    async fn products_list_sorted_by_name() {
        let catalog = seeded_catalog().await;
        let products = catalog.list_products().await.expect("list");
        let names: Vec<&str> = products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Candle", "Mug", "Notebook", "Tote Bag"]);
    }

    #[tokio::test]
    async fn discount_statuses_are_derived_on_read() {
        let catalog = seeded_catalog().await;
        let discounts = catalog.list_discounts().await.expect("list");
        let status_of = |code: &str| {
            discounts
                .iter()
                .find(|d| d.discount.code == code)
                .map(|d| d.status)
        };
        assert_eq!(status_of("WELCOME10"), Some(DiscountStatus::Active));
        assert_eq!(status_of("LAUNCH2099"), Some(DiscountStatus::Scheduled));
    }

    #[tokio::test]
    async fn discount_lookup_is_case_insensitive() {
        let catalog = seeded_catalog().await;
        let hit = catalog
            .find_discount("  welcome10 ")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(hit.discount.code, "WELCOME10");

        assert!(catalog
            .find_discount("NOPE")
            .await
            .expect("lookup")
            .is_none());
        assert!(catalog.find_discount("").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn customer_aggregates_read_through() {
        let catalog = seeded_catalog().await;
        let customer = catalog.get_customer("cus-7").await.expect("customer");
        assert_eq!(customer.total_orders, 12);
        assert_eq!(customer.total_spent, 1480.5);

        let err = catalog.get_customer("ghost").await.expect_err("absent");
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
