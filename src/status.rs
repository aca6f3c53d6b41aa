//! Status taxonomy: order, payment, priority, stock, and discount statuses,
//! plus the pure classification functions that derive them.
//!
//! Everything in this module is stateless and total over the valid domain.
//! Negative stock or totals are rejected by callers, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stock at or below this count (and above zero) is reported as low.
///
/// The reference dashboard carried a second threshold of 5 in one widget
/// read path; the business rule is unified on this single constant.
pub const LOW_STOCK_THRESHOLD: i64 = 10;

/// Order totals at or above this are high priority.
pub const HIGH_PRIORITY_TOTAL: f64 = 500.0;
/// Order totals at or above this (and below the high cutoff) are medium.
pub const MEDIUM_PRIORITY_TOTAL: f64 = 200.0;

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether `self -> to` is on the lifecycle graph.
    ///
    /// Forward path only: pending -> processing -> shipped -> delivered.
    /// Cancellation is reachable from pending or processing and terminal.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payment status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" => Some(PaymentStatus::Paid),
            "unpaid" => Some(PaymentStatus::Unpaid),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive an order's priority from its monetary total.
///
/// Boundaries are inclusive: 200.00 is medium, 500.00 is high.
pub fn priority_of(total: f64) -> Priority {
    if total >= HIGH_PRIORITY_TOTAL {
        Priority::High
    } else if total >= MEDIUM_PRIORITY_TOTAL {
        Priority::Medium
    } else {
        Priority::Low
    }
}

// ---------------------------------------------------------------------------
// Stock status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::LowStock => "low_stock",
            StockStatus::OutOfStock => "out_of_stock",
        }
    }

    /// Human label for display surfaces.
    pub fn label(&self) -> &'static str {
        match self {
            StockStatus::InStock => "In Stock",
            StockStatus::LowStock => "Low Stock",
            StockStatus::OutOfStock => "Out of Stock",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "in_stock" => Some(StockStatus::InStock),
            "low_stock" => Some(StockStatus::LowStock),
            "out_of_stock" => Some(StockStatus::OutOfStock),
            _ => None,
        }
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a stock count into its status label.
///
/// Status must never be set independently of stock; every write path that
/// changes stock recomputes this in the same operation.
pub fn classify_stock(stock: i64) -> StockStatus {
    if stock <= 0 {
        StockStatus::OutOfStock
    } else if stock <= LOW_STOCK_THRESHOLD {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}

// ---------------------------------------------------------------------------
// Discounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountStatus {
    Scheduled,
    Active,
    Expired,
}

impl DiscountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountStatus::Scheduled => "scheduled",
            DiscountStatus::Active => "active",
            DiscountStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for DiscountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive a discount's status from its date window. Never stored; recomputed
/// on every read.
pub fn discount_status(
    now: DateTime<Utc>,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
) -> DiscountStatus {
    if now < starts_at {
        DiscountStatus::Scheduled
    } else if matches!(ends_at, Some(end) if now > end) {
        DiscountStatus::Expired
    } else {
        DiscountStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classify_stock_covers_every_count() {
        assert_eq!(classify_stock(0), StockStatus::OutOfStock);
        assert_eq!(classify_stock(1), StockStatus::LowStock);
        assert_eq!(classify_stock(LOW_STOCK_THRESHOLD), StockStatus::LowStock);
        assert_eq!(
            classify_stock(LOW_STOCK_THRESHOLD + 1),
            StockStatus::InStock
        );
        assert_eq!(classify_stock(5_000), StockStatus::InStock);
    }

    #[test]
    fn classify_stock_is_monotonic_as_stock_decreases() {
        // Status can only get worse (or stay) as stock shrinks.
        fn rank(s: StockStatus) -> u8 {
            match s {
                StockStatus::InStock => 2,
                StockStatus::LowStock => 1,
                StockStatus::OutOfStock => 0,
            }
        }
        let mut prev = rank(classify_stock(0));
        for stock in 1..=50 {
            let next = rank(classify_stock(stock));
            assert!(next >= prev, "status improved while stock fell: {stock}");
            prev = next;
        }
    }

    #[test]
    fn priority_boundaries_are_exact() {
        assert_eq!(priority_of(199.99), Priority::Low);
        assert_eq!(priority_of(200.00), Priority::Medium);
        assert_eq!(priority_of(499.99), Priority::Medium);
        assert_eq!(priority_of(500.00), Priority::High);
        assert_eq!(priority_of(320.11), Priority::Medium);
    }

    #[test]
    fn transition_graph_admits_only_the_lifecycle_edges() {
        use OrderStatus::*;
        let all = [Pending, Processing, Shipped, Delivered, Cancelled];
        let allowed = [
            (Pending, Processing),
            (Processing, Shipped),
            (Shipped, Delivered),
            (Pending, Cancelled),
            (Processing, Cancelled),
        ];
        for from in all {
            for to in all {
                let expect = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition(to),
                    expect,
                    "edge {from} -> {to} misclassified"
                );
            }
        }
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
    }

    #[test]
    fn discount_status_scheduled_until_start() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        let future_start = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            discount_status(now, future_start, None),
            DiscountStatus::Scheduled
        );
    }

    #[test]
    fn discount_status_active_within_window_and_expired_after() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        let during = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            discount_status(during, start, Some(end)),
            DiscountStatus::Active
        );

        let after = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        assert_eq!(
            discount_status(after, start, Some(end)),
            DiscountStatus::Expired
        );

        // Open-ended discounts never expire.
        assert_eq!(discount_status(after, start, None), DiscountStatus::Active);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("Canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::parse("unknown"), None);
        assert_eq!(StockStatus::parse("Out of Stock"), Some(StockStatus::OutOfStock));
        assert_eq!(PaymentStatus::parse(" Paid "), Some(PaymentStatus::Paid));
    }
}
