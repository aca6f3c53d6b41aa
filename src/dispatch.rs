//! Order action dispatcher: user-triggered state changes as remote writes.
//!
//! Each action performs exactly one record update. Failures surface to the
//! caller untouched — nothing is retried and no partial state is left behind;
//! the resulting update event on the change feed is what reconciles any live
//! views. Unlike the reference implementation, the lifecycle graph is
//! enforced here rather than trusted to the calling UI.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{tables, Order};
use crate::status::{OrderStatus, PaymentStatus};
use crate::store::RecordStore;

async fn load_order(store: &dyn RecordStore, order_id: &str) -> Result<Order> {
    let record = store
        .get(tables::ORDERS, order_id)
        .await?
        .ok_or_else(|| Error::not_found(tables::ORDERS, order_id))?;
    Order::from_record(&record)
}

/// Move an order along its lifecycle.
///
/// Rejects any edge not on the graph (forward path plus cancellation from
/// pending/processing) with `InvalidTransition`, leaving the record as it
/// was.
pub async fn transition(
    store: &dyn RecordStore,
    order_id: &str,
    new_status: OrderStatus,
) -> Result<()> {
    let order = load_order(store, order_id).await?;
    if !order.status.can_transition(new_status) {
        warn!(
            order_id = order_id,
            from = %order.status,
            to = %new_status,
            "rejected order transition"
        );
        return Err(Error::InvalidTransition {
            from: order.status,
            to: new_status,
        });
    }

    store
        .update(
            tables::ORDERS,
            order_id,
            json!({
                "status": new_status.as_str(),
                "updated_at": Utc::now().to_rfc3339(),
            }),
        )
        .await?;
    info!(order_id = order_id, status = %new_status, "order transitioned");
    Ok(())
}

/// Set the payment field on an order. Payment states have no enforced graph;
/// paid orders can be refunded and unpaid orders marked paid.
pub async fn set_payment_status(
    store: &dyn RecordStore,
    order_id: &str,
    payment_status: PaymentStatus,
) -> Result<()> {
    // Existence check keeps a missing order a NotFound rather than whatever
    // the backend reports for a blind patch.
    load_order(store, order_id).await?;
    store
        .update(
            tables::ORDERS,
            order_id,
            json!({
                "payment_status": payment_status.as_str(),
                "updated_at": Utc::now().to_rfc3339(),
            }),
        )
        .await?;
    info!(order_id = order_id, payment_status = %payment_status, "payment status set");
    Ok(())
}

/// Hand an order to a courier.
///
/// Currently only transitions the order to `Processing`. Courier id,
/// tracking number, and shipping method are logged but not persisted — the
/// order table has no columns for them and no shipment table exists yet.
pub async fn assign_courier(
    store: &dyn RecordStore,
    order_id: &str,
    courier_id: &str,
    tracking_number: &str,
    shipping_method: &str,
) -> Result<()> {
    info!(
        order_id = order_id,
        courier_id = courier_id,
        tracking_number = tracking_number,
        shipping_method = shipping_method,
        "assigning courier"
    );
    transition(store, order_id, OrderStatus::Processing).await
}
