//! Live order view: keeps an in-memory ordered sequence of order view models
//! consistent with the remote orders table as insert/update/delete events
//! arrive on the change feed.
//!
//! [`OrderBoard`] holds the sequence and applies events synchronously, so it
//! can be tested by feeding synthetic events with no network channel. The
//! async wrapper [`run_board`] owns a board inside a spawned task: it
//! subscribes before the initial bulk read (events arriving early are
//! buffered and reconciled after seeding), republishes a snapshot through the
//! caller's `on_change` after every visible change, and tears down when its
//! cancellation token fires.
//!
//! This is a best-effort, eventually-consistent view, not a durable log: an
//! event whose row fetch fails is dropped and logged, and the next event for
//! that id (or a manual refresh) corrects the view.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{tables, value_str};
use crate::projection::{project_order, OrderView};
use crate::status::OrderStatus;
use crate::store::{ChangeEvent, EventKind, Join, Query, RecordStore, SortDir};

/// Which orders a board shows: optionally a single status, optionally
/// bounded to the most recent N by arrival order.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
}

impl FeedFilter {
    /// Every order, unbounded.
    pub fn all() -> Self {
        FeedFilter::default()
    }

    /// Only orders in `status`, e.g. a pending-only queue widget.
    pub fn with_status(status: OrderStatus) -> Self {
        FeedFilter {
            status: Some(status),
            limit: None,
        }
    }

    /// Bound the board to the most recent `limit` entries.
    pub fn latest(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Commands a subscription handle can send into a running board task.
#[derive(Debug)]
pub(crate) enum BoardCommand {
    /// Optimistic local removal, e.g. dropping an order from a pending
    /// queue as soon as the user clicks Process, ahead of the update event.
    Retract(String),
}

// ---------------------------------------------------------------------------
// Board state
// ---------------------------------------------------------------------------

/// Ordered collection of order view models, newest first by arrival.
#[derive(Debug)]
pub struct OrderBoard {
    filter: FeedFilter,
    entries: Vec<OrderView>,
}

impl OrderBoard {
    pub fn new(filter: FeedFilter) -> Self {
        OrderBoard {
            filter,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[OrderView] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matches(&self, view: &OrderView) -> bool {
        self.filter.status.map_or(true, |s| view.status == s)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    fn truncate_to_bound(&mut self) {
        if let Some(limit) = self.filter.limit {
            self.entries.truncate(limit);
        }
    }

    /// Merge the initial bulk read into the board. Rows whose id is already
    /// present (from an event that beat the bulk read) keep their fresher
    /// event-sourced entry; bulk rows are appended in their given order.
    /// Returns whether the board changed.
    pub fn seed(&mut self, rows: Vec<OrderView>) -> bool {
        let mut changed = false;
        for row in rows {
            if self.matches(&row) && self.position(&row.id).is_none() {
                self.entries.push(row);
                changed = true;
            }
        }
        self.truncate_to_bound();
        changed
    }

    /// Apply an insert event. An id already present is treated as an update;
    /// a status outside the board's filter is excluded.
    pub fn insert(&mut self, view: OrderView) -> bool {
        if self.position(&view.id).is_some() {
            return self.update(view);
        }
        if !self.matches(&view) {
            return false;
        }
        self.entries.insert(0, view);
        self.truncate_to_bound();
        true
    }

    /// Apply an update event: replace in place. An entry whose new status
    /// falls outside the filter leaves the board. An absent id is an
    /// insert-equivalent on unfiltered boards and a no-op on filtered ones
    /// (the order may have been outside the filter all along).
    pub fn update(&mut self, view: OrderView) -> bool {
        match self.position(&view.id) {
            Some(pos) => {
                if self.matches(&view) {
                    self.entries[pos] = view;
                } else {
                    self.entries.remove(pos);
                }
                true
            }
            None if self.filter.status.is_none() => {
                self.entries.insert(0, view);
                self.truncate_to_bound();
                true
            }
            None => false,
        }
    }

    /// Apply a delete event. A missing id is a no-op.
    pub fn delete(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Optimistic local removal ahead of the remote event. The later delete
    /// or out-of-filter update for the same id lands as a no-op.
    pub fn retract(&mut self, id: &str) -> bool {
        self.delete(id)
    }
}

// ---------------------------------------------------------------------------
// Bulk load
// ---------------------------------------------------------------------------

/// Initial bulk read: orders with the customer join, newest first, filtered
/// and bounded like the board. Rows that fail to project are skipped with a
/// warning rather than failing the whole load.
pub(crate) async fn fetch_order_views(
    store: &dyn RecordStore,
    filter: &FeedFilter,
) -> Result<Vec<OrderView>> {
    let mut query = Query::new()
        .order_by("created_at", SortDir::Desc)
        .join(Join::customer_name());
    if let Some(status) = filter.status {
        query = query.filter("status", status.as_str());
    }
    if let Some(limit) = filter.limit {
        query = query.limit(limit);
    }

    let rows = store.list(tables::ORDERS, &query).await?;
    Ok(rows
        .iter()
        .filter_map(|row| match project_order(row) {
            Ok(view) => Some(view),
            Err(error) => {
                warn!(error = %error, "skipping unprojectable order row");
                None
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Subscription task
// ---------------------------------------------------------------------------

pub type OnChange = Box<dyn Fn(&[OrderView]) + Send + Sync>;

/// Resolve an event into a view model. The event payload is used directly
/// when it already embeds the customer join (or references no customer);
/// otherwise the full row is fetched with the join in one read.
async fn resolve_view(store: &dyn RecordStore, event: &ChangeEvent, id: &str) -> Result<OrderView> {
    if let Some(row) = &event.new {
        let has_join = row
            .get("customers")
            .map(|v| !v.is_null())
            .unwrap_or(false)
            || value_str(row, &["customer_name", "customerName"]).is_some();
        let references_customer = value_str(row, &["customer_id", "customerId"]).is_some();
        if has_join || !references_customer {
            return project_order(row);
        }
    }
    let row = store
        .get_joined(tables::ORDERS, id, &Join::customer_name())
        .await?
        .ok_or_else(|| Error::not_found(tables::ORDERS, id))?;
    project_order(&row)
}

async fn handle_event(
    store: &dyn RecordStore,
    board: &mut OrderBoard,
    event: ChangeEvent,
) -> bool {
    let Some(id) = event.record_id() else {
        warn!(kind = %event.kind, "dropping change-feed event without record id");
        return false;
    };

    match event.kind {
        EventKind::Insert | EventKind::Update => {
            let view = match resolve_view(store, &event, &id).await {
                Ok(view) => view,
                Err(error) => {
                    // Dropped, not retried: the next event for this id or a
                    // manual refresh corrects the view.
                    warn!(order_id = %id, kind = %event.kind, error = %error,
                          "dropping change-feed event");
                    return false;
                }
            };
            if event.kind == EventKind::Insert {
                board.insert(view)
            } else {
                board.update(view)
            }
        }
        EventKind::Delete => board.delete(&id),
    }
}

/// Drive a board against the store's change feed until cancelled.
pub(crate) async fn run_board(
    store: Arc<dyn RecordStore>,
    filter: FeedFilter,
    on_change: OnChange,
    mut commands: mpsc::UnboundedReceiver<BoardCommand>,
    cancel: CancellationToken,
) {
    // Subscribe before the bulk read so nothing emitted in between is lost;
    // the board dedups anything delivered both ways.
    let mut feed = store.subscribe(tables::ORDERS);
    let mut board = OrderBoard::new(filter.clone());

    match fetch_order_views(store.as_ref(), &filter).await {
        Ok(rows) => {
            board.seed(rows);
        }
        Err(error) => {
            warn!(error = %error, "initial order load failed; continuing on feed only");
        }
    }
    on_change(board.entries());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(BoardCommand::Retract(id)) => {
                    if board.retract(&id) {
                        on_change(board.entries());
                    }
                }
                // Handle dropped; the subscription is over.
                None => break,
            },
            event = feed.recv() => match event {
                Ok(event) => {
                    if handle_event(store.as_ref(), &mut board, event).await {
                        on_change(board.entries());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "order feed lagged; continuing from next event");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("order board stopped");
}

/// Parse a raw change event as delivered by an external feed into the typed
/// form, for callers that bridge foreign payloads onto a board.
pub fn event_from_payload(kind: &str, old: Option<Value>, new: Option<Value>) -> Result<ChangeEvent> {
    let kind = match kind.trim().to_ascii_lowercase().as_str() {
        "insert" => EventKind::Insert,
        "update" => EventKind::Update,
        "delete" => EventKind::Delete,
        other => {
            return Err(Error::MalformedEvent(format!(
                "unknown change-feed event type: {other}"
            )))
        }
    };
    Ok(ChangeEvent { kind, old, new })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{PaymentStatus, Priority};

    fn view(id: &str, status: OrderStatus) -> OrderView {
        OrderView {
            id: id.to_string(),
            order_number: format!("ORD-{id}"),
            status,
            payment_status: PaymentStatus::Unpaid,
            total: 100.0,
            item_count: 1,
            date: "Aug 01, 2026".to_string(),
            customer: "Maria Pappas".to_string(),
            customer_id: Some("cus-7".to_string()),
            priority: Priority::Low,
        }
    }

    fn ids(board: &OrderBoard) -> Vec<&str> {
        board.entries().iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn insert_prepends_newest_first() {
        let mut board = OrderBoard::new(FeedFilter::all());
        assert!(board.insert(view("a", OrderStatus::Pending)));
        assert!(board.insert(view("b", OrderStatus::Pending)));
        assert_eq!(ids(&board), vec!["b", "a"]);
    }

    #[test]
    fn insert_for_present_id_never_duplicates() {
        let mut board = OrderBoard::new(FeedFilter::all());
        board.seed(vec![view("a", OrderStatus::Pending)]);
        assert!(board.insert(view("a", OrderStatus::Processing)));
        assert_eq!(board.len(), 1);
        assert_eq!(board.entries()[0].status, OrderStatus::Processing);
    }

    #[test]
    fn filtered_board_excludes_non_matching_inserts() {
        let mut board = OrderBoard::new(FeedFilter::with_status(OrderStatus::Pending));
        assert!(!board.insert(view("a", OrderStatus::Shipped)));
        assert!(board.insert(view("b", OrderStatus::Pending)));
        assert_eq!(ids(&board), vec!["b"]);
    }

    #[test]
    fn update_replaces_in_place_preserving_order() {
        let mut board = OrderBoard::new(FeedFilter::all());
        board.insert(view("a", OrderStatus::Pending));
        board.insert(view("b", OrderStatus::Pending));

        let mut changed = view("a", OrderStatus::Pending);
        changed.total = 750.0;
        assert!(board.update(changed));
        assert_eq!(ids(&board), vec!["b", "a"]);
        assert_eq!(board.entries()[1].total, 750.0);
    }

    #[test]
    fn update_moving_order_out_of_filter_removes_it() {
        let mut board = OrderBoard::new(FeedFilter::with_status(OrderStatus::Pending));
        board.insert(view("a", OrderStatus::Pending));
        assert!(board.update(view("a", OrderStatus::Processing)));
        assert!(board.is_empty());
    }

    #[test]
    fn update_for_absent_id_is_insert_equivalent_only_when_unfiltered() {
        let mut unfiltered = OrderBoard::new(FeedFilter::all());
        assert!(unfiltered.update(view("a", OrderStatus::Shipped)));
        assert_eq!(unfiltered.len(), 1);

        let mut filtered = OrderBoard::new(FeedFilter::with_status(OrderStatus::Pending));
        assert!(!filtered.update(view("b", OrderStatus::Pending)));
        assert!(filtered.is_empty());
    }

    #[test]
    fn delete_for_absent_id_is_a_no_op() {
        let mut board = OrderBoard::new(FeedFilter::all());
        board.insert(view("a", OrderStatus::Pending));
        assert!(!board.delete("ghost"));
        assert_eq!(ids(&board), vec!["a"]);

        assert!(board.delete("a"));
        assert!(board.is_empty());
    }

    #[test]
    fn bounded_board_keeps_the_most_recent_n() {
        let mut board = OrderBoard::new(FeedFilter::with_status(OrderStatus::Pending).latest(3));
        for id in ["a", "b", "c", "d"] {
            board.insert(view(id, OrderStatus::Pending));
        }
        assert_eq!(board.len(), 3);
        assert_eq!(ids(&board), vec!["d", "c", "b"]);
    }

    #[test]
    fn seed_merges_without_displacing_event_sourced_entries() {
        let mut board = OrderBoard::new(FeedFilter::all());
        // An insert event beat the bulk read.
        let mut early = view("a", OrderStatus::Processing);
        early.total = 999.0;
        board.insert(early);

        board.seed(vec![view("a", OrderStatus::Pending), view("b", OrderStatus::Pending)]);
        assert_eq!(ids(&board), vec!["a", "b"]);
        // The fresher event entry for "a" survived the seed.
        assert_eq!(board.entries()[0].total, 999.0);
        assert_eq!(board.entries()[0].status, OrderStatus::Processing);
    }

    #[test]
    fn seed_respects_filter_and_bound() {
        let mut board = OrderBoard::new(FeedFilter::with_status(OrderStatus::Pending).latest(2));
        let changed = board.seed(vec![
            view("a", OrderStatus::Pending),
            view("b", OrderStatus::Shipped),
            view("c", OrderStatus::Pending),
            view("d", OrderStatus::Pending),
        ]);
        assert!(changed);
        assert_eq!(ids(&board), vec!["a", "c"]);
    }

    #[test]
    fn retract_removes_optimistically_and_later_delete_is_a_no_op() {
        let mut board = OrderBoard::new(FeedFilter::with_status(OrderStatus::Pending));
        board.insert(view("a", OrderStatus::Pending));

        assert!(board.retract("a"));
        assert!(board.is_empty());
        // The remote delete/update event for the same id lands as a no-op.
        assert!(!board.delete("a"));
    }

    #[test]
    fn foreign_event_payloads_parse_or_fail_loudly() {
        let ev = event_from_payload("INSERT", None, Some(serde_json::json!({ "id": "a" })))
            .expect("insert event should parse");
        assert_eq!(ev.kind, EventKind::Insert);
        assert_eq!(ev.record_id().as_deref(), Some("a"));

        let err = event_from_payload("truncate", None, None).expect_err("unknown type");
        assert!(matches!(err, Error::MalformedEvent(_)));
    }
}
