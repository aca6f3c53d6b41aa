//! Record store boundary.
//!
//! The core depends on this contract only, never on a particular storage
//! engine: filtered/sorted/paginated reads, single-record writes, an atomic
//! read-modify-write primitive, and a subscribe-to-table-changes feed
//! yielding insert/update/delete events.
//!
//! Two backends ship with the crate: [`SqliteStore`] (in-process, also the
//! test store) and [`RestStore`] (hosted record service client).

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::value_str;

mod rest;
mod sqlite;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

/// Change-feed buffer per table. A receiver that falls further behind than
/// this is lagged: it logs, skips, and continues from the next event.
pub(crate) const FEED_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "insert",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change-feed notification: the event type plus the old and new row
/// images (whichever the event carries).
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(new: Value) -> Self {
        ChangeEvent {
            kind: EventKind::Insert,
            old: None,
            new: Some(new),
        }
    }

    pub fn update(old: Value, new: Value) -> Self {
        ChangeEvent {
            kind: EventKind::Update,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn delete(old: Value) -> Self {
        ChangeEvent {
            kind: EventKind::Delete,
            old: Some(old),
            new: None,
        }
    }

    /// Record id the event refers to, from whichever row image carries it.
    pub fn record_id(&self) -> Option<String> {
        self.new
            .as_ref()
            .and_then(|row| value_str(row, &["id"]))
            .or_else(|| self.old.as_ref().and_then(|row| value_str(row, &["id"])))
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

/// Filtered/sorted/paginated read description. Filters are equality matches
/// on top-level document fields; an optional join embeds an associated
/// record's display field in every returned row.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, SortDir)>,
    pub limit: Option<usize>,
    pub join: Option<Join>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, dir: SortDir) -> Self {
        self.order_by = Some((field.to_string(), dir));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.join = Some(join);
        self
    }
}

/// Join description for reads that embed an associated record's display
/// field, e.g. an order together with its customer's name.
#[derive(Debug, Clone)]
pub struct Join {
    /// Table the joined record lives in.
    pub table: String,
    /// Field on the base record holding the joined record's id.
    pub local_key: String,
    /// Field to pull from the joined record.
    pub select: String,
}

impl Join {
    /// The one join the core needs: order -> customer display name,
    /// embedded as `customers: { name }`.
    pub fn customer_name() -> Self {
        Join {
            table: "customers".to_string(),
            local_key: "customer_id".to_string(),
            select: "name".to_string(),
        }
    }
}

/// Closure applied under the store's write lock by [`RecordStore::mutate`].
pub type MutateFn = Box<dyn FnOnce(Value) -> Result<Value> + Send>;

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record by id, or `None` if absent.
    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>>;

    /// Fetch one record with an associated record's display field embedded
    /// in one logical read.
    async fn get_joined(&self, table: &str, id: &str, join: &Join) -> Result<Option<Value>>;

    /// Filtered/sorted/paginated read.
    async fn list(&self, table: &str, query: &Query) -> Result<Vec<Value>>;

    /// Insert a record, returning the stored row. Emits one insert event.
    async fn insert(&self, table: &str, record: Value) -> Result<Value>;

    /// Shallow-merge `patch` into the record, returning the updated row.
    /// Fails with `NotFound` if absent. Emits one update event.
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value>;

    /// Atomic read-modify-write: `apply` runs against the current row under
    /// the store's write lock and its result replaces the row. Emits one
    /// update event. This is the primitive callers needing exact accounting
    /// under concurrent writers use instead of get-then-update.
    async fn mutate(&self, table: &str, id: &str, apply: MutateFn) -> Result<Value>;

    /// Delete by id; a missing record is a no-op. Emits one delete event
    /// when a row was actually removed.
    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    /// Subscribe to the table's change feed. Events for a given record id
    /// arrive in emission order; no ordering holds across ids.
    fn subscribe(&self, table: &str) -> broadcast::Receiver<ChangeEvent>;
}
