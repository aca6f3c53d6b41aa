//! Record types for the back-office core, plus the tolerant field-extraction
//! helpers used when parsing rows from the record store and change feed.
//!
//! The hosted store speaks snake_case column names; older call sites and the
//! realtime payloads sometimes carry camelCase keys, so every required field
//! is read through a key-alias list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::status::{
    classify_stock, DiscountKind, DiscountStatus, OrderStatus, PaymentStatus, StockStatus,
};

/// Remote table names the core reads and writes.
pub mod tables {
    pub const ORDERS: &str = "orders";
    pub const PRODUCTS: &str = "products";
    pub const DISCOUNTS: &str = "discounts";
    pub const CUSTOMERS: &str = "customers";
}

// ---------------------------------------------------------------------------
// Tolerant field extraction
// ---------------------------------------------------------------------------

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_i64(v: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_datetime(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    value_str(v, keys)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn require_str(v: &Value, keys: &[&str], what: &str) -> Result<String> {
    value_str(v, keys).ok_or_else(|| Error::MalformedEvent(format!("missing {what}")))
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// An order row as stored remotely. Priority and display date are derived,
/// never persisted; see the projection builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: f64,
    pub item_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl Order {
    /// Parse a raw store row or change-feed payload into a typed order.
    ///
    /// Accepts snake_case and camelCase key spellings. A missing id, status,
    /// or creation timestamp is a malformed payload.
    pub fn from_record(record: &Value) -> Result<Self> {
        let id = require_str(record, &["id", "order_id", "orderId"], "order id")?;
        let status_raw = require_str(record, &["status"], "order status")?;
        let status = OrderStatus::parse(&status_raw)
            .ok_or_else(|| Error::MalformedEvent(format!("unknown order status: {status_raw}")))?;
        let payment_raw = value_str(record, &["payment_status", "paymentStatus"])
            .unwrap_or_else(|| "unpaid".to_string());
        let payment_status = PaymentStatus::parse(&payment_raw).ok_or_else(|| {
            Error::MalformedEvent(format!("unknown payment status: {payment_raw}"))
        })?;
        let created_at = value_datetime(record, &["created_at", "createdAt"])
            .ok_or_else(|| Error::MalformedEvent(format!("order {id} missing created_at")))?;

        Ok(Order {
            order_number: value_str(record, &["order_number", "orderNumber"])
                .unwrap_or_else(|| id.clone()),
            status,
            payment_status,
            total: value_f64(record, &["total", "total_amount", "totalAmount"]).unwrap_or(0.0),
            item_count: value_i64(record, &["item_count", "itemCount", "items"])
                .unwrap_or(0)
                .max(0) as u32,
            created_at,
            customer_id: value_str(record, &["customer_id", "customerId"]),
            id,
        })
    }
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
    pub status: StockStatus,
    pub last_restocked: Option<DateTime<Utc>>,
}

impl Product {
    pub fn from_record(record: &Value) -> Result<Self> {
        let id = require_str(record, &["id", "product_id", "productId"], "product id")?;
        let stock = value_i64(record, &["stock", "stock_quantity", "stockQuantity"])
            .ok_or_else(|| Error::MalformedEvent(format!("product {id} missing stock")))?;
        // Stored status is a denormalized copy; the stock count is the truth.
        let status = value_str(record, &["status"])
            .and_then(|raw| StockStatus::parse(&raw))
            .unwrap_or_else(|| classify_stock(stock));

        Ok(Product {
            name: value_str(record, &["name"]).unwrap_or_default(),
            category: value_str(record, &["category"]).unwrap_or_default(),
            price: value_f64(record, &["price"]).unwrap_or(0.0),
            stock,
            status,
            last_restocked: value_datetime(record, &["last_restocked", "lastRestocked"]),
            id,
        })
    }
}

// ---------------------------------------------------------------------------
// Discount
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: String,
    /// Unique, case-normalized to upper-case on write and lookup.
    pub code: String,
    pub kind: DiscountKind,
    pub value: f64,
    pub usage_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<u32>,
    pub starts_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_purchase: Option<f64>,
}

impl Discount {
    pub fn from_record(record: &Value) -> Result<Self> {
        let id = require_str(record, &["id"], "discount id")?;
        let code = require_str(record, &["code"], "discount code")?.to_uppercase();
        let kind_raw = value_str(record, &["kind", "type", "discount_type", "discountType"])
            .unwrap_or_else(|| "percentage".to_string());
        let kind = match kind_raw.to_ascii_lowercase().as_str() {
            "percentage" | "percent" => DiscountKind::Percentage,
            "fixed" | "fixed_amount" => DiscountKind::Fixed,
            other => {
                return Err(Error::MalformedEvent(format!(
                    "unknown discount kind: {other}"
                )))
            }
        };
        let starts_at = value_datetime(record, &["starts_at", "startsAt", "start_date", "startDate"])
            .ok_or_else(|| Error::MalformedEvent(format!("discount {id} missing start date")))?;

        Ok(Discount {
            code,
            kind,
            value: value_f64(record, &["value"]).unwrap_or(0.0),
            usage_count: value_i64(record, &["usage_count", "usageCount"])
                .unwrap_or(0)
                .max(0) as u32,
            usage_limit: value_i64(record, &["usage_limit", "usageLimit"])
                .filter(|n| *n >= 0)
                .map(|n| n as u32),
            starts_at,
            ends_at: value_datetime(record, &["ends_at", "endsAt", "end_date", "endDate"]),
            min_purchase: value_f64(record, &["min_purchase", "minPurchase"]),
            id,
        })
    }

    /// Derived status, recomputed on every read.
    pub fn status_at(&self, now: DateTime<Utc>) -> DiscountStatus {
        crate::status::discount_status(now, self.starts_at, self.ends_at)
    }
}

// ---------------------------------------------------------------------------
// Customer
// ---------------------------------------------------------------------------

/// Aggregates (`total_orders`, `total_spent`) are maintained by the order
/// placement pipeline and are read-only from this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub total_orders: u32,
    pub total_spent: f64,
}

impl Customer {
    pub fn from_record(record: &Value) -> Result<Self> {
        let id = require_str(record, &["id", "customer_id", "customerId"], "customer id")?;
        Ok(Customer {
            name: value_str(record, &["name"]).unwrap_or_default(),
            email: value_str(record, &["email"]).unwrap_or_default(),
            phone: value_str(record, &["phone"]),
            address: value_str(record, &["address"]),
            total_orders: value_i64(record, &["total_orders", "totalOrders"])
                .unwrap_or(0)
                .max(0) as u32,
            total_spent: value_f64(record, &["total_spent", "totalSpent"]).unwrap_or(0.0),
            id,
        })
    }
}
