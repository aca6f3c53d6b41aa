//! In-process record store backed by SQLite.
//!
//! Uses rusqlite with WAL mode. Records are JSON documents in a single
//! `(tbl, id, doc)` table; every successful write emits exactly one change
//! event through a per-table broadcast channel. `mutate` runs its closure
//! while holding the connection lock, so read-modify-write is atomic with
//! respect to every other writer going through this store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{ChangeEvent, Join, MutateFn, Query, RecordStore, SortDir, FEED_CAPACITY};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    feeds: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl SqliteStore {
    /// Open (or create) the store at `{data_dir}/backoffice.db`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::RemoteWriteFailed(format!("create data dir: {e}")))?;
        let db_path = data_dir.join("backoffice.db");
        info!("Opening record store at {}", db_path.display());

        let conn = Connection::open(&db_path)
            .map_err(|e| Error::RemoteWriteFailed(format!("sqlite open: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::RemoteWriteFailed(format!("pragma setup: {e}")))?;

        Self::from_connection(conn)
    }

    /// In-memory store for tests and ephemeral embedding.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::RemoteWriteFailed(format!("sqlite open: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                tbl TEXT NOT NULL,
                id TEXT NOT NULL,
                doc TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                PRIMARY KEY (tbl, id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_updated
                ON records (tbl, updated_at);",
        )
        .map_err(|e| Error::RemoteWriteFailed(format!("create records table: {e}")))?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
            feeds: Mutex::new(HashMap::new()),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::RemoteWriteFailed(format!("store lock poisoned: {e}")))
    }

    fn emit(&self, table: &str, event: ChangeEvent) {
        let feeds = match self.feeds.lock() {
            Ok(f) => f,
            Err(_) => return,
        };
        if let Some(sender) = feeds.get(table) {
            // Send fails only when no receiver is alive; that is fine.
            let _ = sender.send(event);
        }
    }

    fn read_doc(conn: &Connection, table: &str, id: &str) -> Result<Option<Value>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT doc FROM records WHERE tbl = ?1 AND id = ?2",
                params![table, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::RemoteWriteFailed(format!("read record: {e}")))?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| Error::MalformedEvent(format!("stored doc for {table}/{id}: {e}"))),
            None => Ok(None),
        }
    }

    fn write_doc(conn: &Connection, table: &str, id: &str, doc: &Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO records (tbl, id, doc, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (tbl, id) DO UPDATE SET
                doc = excluded.doc, updated_at = excluded.updated_at",
            params![table, id, doc.to_string(), now],
        )
        .map_err(|e| Error::RemoteWriteFailed(format!("write record: {e}")))?;
        Ok(())
    }
}

/// Embed the joined record's selected field as `{join.table: {select: ..}}`,
/// matching the hosted service's joined-read shape. A missing joined record
/// leaves the base row untouched.
fn embed_join(conn: &Connection, doc: &mut Value, join: &Join) {
    let joined = doc
        .get(&join.local_key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .and_then(|key| SqliteStore::read_doc(conn, &join.table, &key).ok().flatten())
        .map(|row| row.get(&join.select).cloned().unwrap_or(Value::Null));
    if let (Some(obj), Some(selected)) = (doc.as_object_mut(), joined) {
        obj.insert(
            join.table.clone(),
            serde_json::json!({ join.select.clone(): selected }),
        );
    }
}

fn merge_patch(mut base: Value, patch: &Value) -> Value {
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

fn matches_filters(doc: &Value, filters: &[(String, Value)]) -> bool {
    filters
        .iter()
        .all(|(field, expect)| doc.get(field) == Some(expect))
}

fn sort_key(doc: &Value, field: &str) -> String {
    match doc.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => format!("{:024.6}", n.as_f64().unwrap_or(0.0)),
        _ => String::new(),
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let conn = self.lock_conn()?;
        Self::read_doc(&conn, table, id)
    }

    async fn get_joined(&self, table: &str, id: &str, join: &Join) -> Result<Option<Value>> {
        let conn = self.lock_conn()?;
        let Some(mut doc) = Self::read_doc(&conn, table, id)? else {
            return Ok(None);
        };
        embed_join(&conn, &mut doc, join);
        Ok(Some(doc))
    }

    async fn list(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM records WHERE tbl = ?1")
            .map_err(|e| Error::RemoteWriteFailed(format!("list records: {e}")))?;
        let rows = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| Error::RemoteWriteFailed(format!("list records: {e}")))?;

        let mut docs: Vec<Value> = rows
            .filter_map(|r| r.ok())
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .filter(|doc| matches_filters(doc, &query.filters))
            .collect();

        if let Some((field, dir)) = &query.order_by {
            docs.sort_by_key(|doc| sort_key(doc, field));
            if *dir == SortDir::Desc {
                docs.reverse();
            }
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        if let Some(join) = &query.join {
            for doc in &mut docs {
                embed_join(&conn, doc, join);
            }
        }
        Ok(docs)
    }

    async fn insert(&self, table: &str, mut record: Value) -> Result<Value> {
        let existing_id = record
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let id = match existing_id {
            Some(id) => id,
            None => {
                let generated = Uuid::new_v4().to_string();
                if let Some(obj) = record.as_object_mut() {
                    obj.insert("id".to_string(), Value::String(generated.clone()));
                }
                generated
            }
        };

        {
            let conn = self.lock_conn()?;
            if Self::read_doc(&conn, table, &id)?.is_some() {
                return Err(Error::RemoteWriteFailed(format!(
                    "duplicate id on insert: {table}/{id}"
                )));
            }
            Self::write_doc(&conn, table, &id, &record)?;
        }

        debug!(table = table, id = %id, "record inserted");
        self.emit(table, ChangeEvent::insert(record.clone()));
        Ok(record)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
        let (old, new) = {
            let conn = self.lock_conn()?;
            let old = Self::read_doc(&conn, table, id)?
                .ok_or_else(|| Error::not_found(table, id))?;
            let new = merge_patch(old.clone(), &patch);
            Self::write_doc(&conn, table, id, &new)?;
            (old, new)
        };

        debug!(table = table, id = id, "record updated");
        self.emit(table, ChangeEvent::update(old, new.clone()));
        Ok(new)
    }

    async fn mutate(&self, table: &str, id: &str, apply: MutateFn) -> Result<Value> {
        let (old, new) = {
            let conn = self.lock_conn()?;
            let old = Self::read_doc(&conn, table, id)?
                .ok_or_else(|| Error::not_found(table, id))?;
            let new = apply(old.clone())?;
            Self::write_doc(&conn, table, id, &new)?;
            (old, new)
        };

        debug!(table = table, id = id, "record mutated");
        self.emit(table, ChangeEvent::update(old, new.clone()));
        Ok(new)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let old = {
            let conn = self.lock_conn()?;
            let old = Self::read_doc(&conn, table, id)?;
            if old.is_some() {
                conn.execute(
                    "DELETE FROM records WHERE tbl = ?1 AND id = ?2",
                    params![table, id],
                )
                .map_err(|e| Error::RemoteWriteFailed(format!("delete record: {e}")))?;
            }
            old
        };

        if let Some(old) = old {
            debug!(table = table, id = id, "record deleted");
            self.emit(table, ChangeEvent::delete(old));
        }
        Ok(())
    }

    fn subscribe(&self, table: &str) -> broadcast::Receiver<ChangeEvent> {
        let mut feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        feeds
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }
}
