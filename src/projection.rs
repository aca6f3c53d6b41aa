//! Order projection: raw order-with-customer-join rows become the view model
//! consumed by the UI.
//!
//! This is the single place the display date, the `"Unknown"` customer
//! fallback, and the derived priority are computed. Both the initial
//! bulk-load path and the realtime insert path go through [`project_order`],
//! so an order renders identically regardless of how it entered the view.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::{value_str, Order};
use crate::status::{priority_of, OrderStatus, PaymentStatus, Priority};

/// Display date format, e.g. `Aug 06, 2026`.
const DATE_FORMAT: &str = "%b %d, %Y";

/// Fallback customer name when the join comes back null.
pub const UNKNOWN_CUSTOMER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: f64,
    pub item_count: u32,
    pub date: String,
    pub customer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub priority: Priority,
}

/// Build the view model from a raw order row.
///
/// The customer join may be embedded by the store either as a flat
/// `customer_name` field or as a nested `customers: {name}` object (the
/// joined-read shape); absence of both falls back to [`UNKNOWN_CUSTOMER`].
pub fn project_order(record: &Value) -> Result<OrderView> {
    let order = Order::from_record(record)?;
    let customer = joined_customer_name(record).unwrap_or_else(|| UNKNOWN_CUSTOMER.to_string());

    Ok(OrderView {
        date: order.created_at.format(DATE_FORMAT).to_string(),
        customer,
        priority: priority_of(order.total),
        id: order.id,
        order_number: order.order_number,
        status: order.status,
        payment_status: order.payment_status,
        total: order.total,
        item_count: order.item_count,
        customer_id: order.customer_id,
    })
}

fn joined_customer_name(record: &Value) -> Option<String> {
    if let Some(name) = value_str(record, &["customer_name", "customerName"]) {
        return Some(name);
    }
    record
        .get("customers")
        .or_else(|| record.get("customer"))
        .and_then(|joined| value_str(joined, &["name"]))
}
