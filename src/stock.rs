//! Stock ledger: the one write path for product stock.
//!
//! Applies a signed delta and recomputes the derived status in the same
//! operation, so a product is never observable with a status inconsistent
//! with its stock. Goes through the store's atomic read-modify-write
//! primitive rather than get-then-update; see the note on `RestStore::mutate`
//! for the residual cross-client caveat.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{tables, value_i64};
use crate::status::{classify_stock, StockStatus};
use crate::store::RecordStore;

/// Result of a ledger application: the post-delta stock count and the status
/// derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub stock: i64,
    pub status: StockStatus,
}

/// Apply a signed delta to a product's stock.
///
/// `new_stock = max(current + delta, 0)` — stock is clamped at zero so the
/// non-negativity invariant holds even for an over-large negative delta.
/// Stock, status, and (for positive deltas) the restock timestamp are
/// written in one update, which emits one change event.
pub async fn apply_delta(
    store: &dyn RecordStore,
    product_id: &str,
    delta: i64,
) -> Result<StockLevel> {
    let now = Utc::now().to_rfc3339();
    let updated = store
        .mutate(
            tables::PRODUCTS,
            product_id,
            Box::new(move |mut doc: Value| {
                let current = value_i64(&doc, &["stock", "stock_quantity", "stockQuantity"])
                    .ok_or_else(|| {
                        Error::MalformedEvent("product record missing stock".to_string())
                    })?;
                let new_stock = (current + delta).max(0);
                let new_status = classify_stock(new_stock);

                let obj = doc.as_object_mut().ok_or_else(|| {
                    Error::MalformedEvent("product record is not an object".to_string())
                })?;
                obj.insert("stock".to_string(), json!(new_stock));
                obj.insert("status".to_string(), json!(new_status.as_str()));
                if delta > 0 {
                    obj.insert("last_restocked".to_string(), json!(now));
                }
                Ok(doc)
            }),
        )
        .await?;

    let stock = value_i64(&updated, &["stock"])
        .ok_or_else(|| Error::MalformedEvent("updated product missing stock".to_string()))?;
    let status = classify_stock(stock);
    info!(
        product_id = product_id,
        delta = delta,
        stock = stock,
        status = %status,
        "stock delta applied"
    );
    Ok(StockLevel { stock, status })
}
