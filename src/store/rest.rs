//! Hosted record service client.
//!
//! Speaks the record service's JSON API with API-key authentication:
//! `/api/records/{table}` for filtered reads and inserts,
//! `/api/records/{table}/{id}` for single-record operations, PostgREST-style
//! query parameters (`status=eq.pending`, `order=created_at.desc`,
//! `select=*,customers(name)`).
//!
//! The change feed is a polling loop: each tick fetches the table and diffs
//! it against the previous snapshot into insert/update/delete events. Feed
//! tasks stop when the store is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::value_str;
use crate::store::{ChangeEvent, Join, MutateFn, Query, RecordStore, SortDir, FEED_CAPACITY};

/// Default timeout for record service requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default change-feed poll interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// URL normalisation and error mapping
// ---------------------------------------------------------------------------

/// Normalise the record service base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach record service at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Client not authorized for this table".to_string(),
        404 => "Record service endpoint not found".to_string(),
        s if s >= 500 => format!("Record service error (HTTP {s})"),
        s => format!("Unexpected response from record service (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct RestInner {
    base_url: String,
    api_key: String,
    client: Client,
}

impl RestInner {
    /// Perform an authenticated request. `Ok(None)` means HTTP 404.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .header("X-Backoffice-Api-Key", &self.api_key)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::RemoteWriteFailed(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|json| value_str(&json, &["error", "message"]))
                .unwrap_or_else(|| status_error(status));
            return Err(Error::RemoteWriteFailed(format!(
                "{detail} (HTTP {})",
                status.as_u16()
            )));
        }

        let body_text = resp.text().await.unwrap_or_default();
        if body_text.is_empty() {
            return Ok(Some(Value::Null));
        }
        serde_json::from_str(&body_text)
            .map(Some)
            .map_err(|e| Error::MalformedEvent(format!("invalid JSON from record service: {e}")))
    }

    async fn fetch_table(&self, table: &str) -> Result<Vec<Value>> {
        let rows = self
            .request(Method::GET, &format!("/api/records/{table}"), None)
            .await?
            .unwrap_or(Value::Null);
        Ok(rows.as_array().cloned().unwrap_or_default())
    }
}

pub struct RestStore {
    inner: Arc<RestInner>,
    feeds: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Self::with_poll_interval(base_url, api_key, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        base_url: &str,
        api_key: &str,
        poll_interval: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url);
        if base_url.is_empty() {
            return Err(Error::RemoteWriteFailed(
                "record service base URL is empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::RemoteWriteFailed(format!("build HTTP client: {e}")))?;

        Ok(RestStore {
            inner: Arc::new(RestInner {
                base_url,
                api_key: api_key.trim().to_string(),
                client,
            }),
            feeds: Mutex::new(HashMap::new()),
            poll_interval,
            shutdown: CancellationToken::new(),
        })
    }

    fn spawn_feed(&self, table: String, sender: broadcast::Sender<ChangeEvent>) {
        let inner = self.inner.clone();
        let cancel = self.shutdown.child_token();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            // The first successful poll primes the snapshot; only subsequent
            // differences become events.
            let mut snapshot: Option<HashMap<String, Value>> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match inner.fetch_table(&table).await {
                    Ok(rows) => {
                        let next = index_rows(&table, rows);
                        if let Some(prev) = &snapshot {
                            for event in diff_snapshots(prev, &next) {
                                let _ = sender.send(event);
                            }
                        }
                        snapshot = Some(next);
                    }
                    Err(error) => {
                        // Next poll recovers; the feed is best-effort.
                        warn!(table = %table, error = %error, "change-feed poll failed");
                    }
                }
            }
            debug!(table = %table, "change-feed poll stopped");
        });
    }
}

impl Drop for RestStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn index_rows(table: &str, rows: Vec<Value>) -> HashMap<String, Value> {
    let mut indexed = HashMap::with_capacity(rows.len());
    for row in rows {
        match value_str(&row, &["id"]) {
            Some(id) => {
                indexed.insert(id, row);
            }
            None => warn!(table = table, "dropping feed row without id"),
        }
    }
    indexed
}

/// Diff two table snapshots into change events: new ids are inserts, changed
/// docs are updates, vanished ids are deletes.
fn diff_snapshots(
    prev: &HashMap<String, Value>,
    next: &HashMap<String, Value>,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for (id, row) in next {
        match prev.get(id) {
            None => events.push(ChangeEvent::insert(row.clone())),
            Some(old) if old != row => {
                events.push(ChangeEvent::update(old.clone(), row.clone()))
            }
            Some(_) => {}
        }
    }
    for (id, old) in prev {
        if !next.contains_key(id) {
            events.push(ChangeEvent::delete(old.clone()));
        }
    }
    events
}

fn query_string(query: &Query) -> String {
    let mut params: Vec<String> = Vec::new();
    if let Some(join) = &query.join {
        params.push(format!("select=*,{}({})", join.table, join.select));
    }
    params.extend(query
        .filters
        .iter()
        .map(|(field, value)| {
            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{field}=eq.{raw}")
        }));
    if let Some((field, dir)) = &query.order_by {
        let dir = match dir {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        };
        params.push(format!("order={field}.{dir}"));
    }
    if let Some(limit) = query.limit {
        params.push(format!("limit={limit}"));
    }
    if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>> {
        self.inner
            .request(Method::GET, &format!("/api/records/{table}/{id}"), None)
            .await
    }

    async fn get_joined(&self, table: &str, id: &str, join: &Join) -> Result<Option<Value>> {
        let path = format!(
            "/api/records/{table}/{id}?select=*,{}({})",
            join.table, join.select
        );
        self.inner.request(Method::GET, &path, None).await
    }

    async fn list(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        let path = format!("/api/records/{table}{}", query_string(query));
        let rows = self
            .inner
            .request(Method::GET, &path, None)
            .await?
            .unwrap_or(Value::Null);
        Ok(rows.as_array().cloned().unwrap_or_default())
    }

    async fn insert(&self, table: &str, record: Value) -> Result<Value> {
        self.inner
            .request(Method::POST, &format!("/api/records/{table}"), Some(&record))
            .await?
            .ok_or_else(|| Error::RemoteWriteFailed(format!("insert into {table} rejected")))
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
        self.inner
            .request(
                Method::PATCH,
                &format!("/api/records/{table}/{id}"),
                Some(&patch),
            )
            .await?
            .ok_or_else(|| Error::not_found(table, id))
    }

    async fn mutate(&self, table: &str, id: &str, apply: MutateFn) -> Result<Value> {
        // Read-modify-write: the hosted service exposes no server-side
        // mutation hook, so concurrent writers from other clients can
        // interleave here. Exact accounting across clients needs a service-
        // side increment endpoint.
        let current = self
            .get(table, id)
            .await?
            .ok_or_else(|| Error::not_found(table, id))?;
        let next = apply(current)?;
        self.update(table, id, next).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.inner
            .request(Method::DELETE, &format!("/api/records/{table}/{id}"), None)
            .await?;
        Ok(())
    }

    fn subscribe(&self, table: &str) -> broadcast::Receiver<ChangeEvent> {
        let mut feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = feeds.get(table) {
            return sender.subscribe();
        }
        let (sender, receiver) = broadcast::channel(FEED_CAPACITY);
        feeds.insert(table.to_string(), sender.clone());
        self.spawn_feed(table.to_string(), sender);
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventKind;
    use serde_json::json;

    #[test]
    fn base_url_normalisation_matches_service_expectations() {
        assert_eq!(
            normalize_base_url("shop.example.com"),
            "https://shop.example.com"
        );
        assert_eq!(
            normalize_base_url("https://shop.example.com/api/"),
            "https://shop.example.com"
        );
        assert_eq!(normalize_base_url("localhost:4000"), "http://localhost:4000");
        assert_eq!(
            normalize_base_url("  https://shop.example.com///  "),
            "https://shop.example.com"
        );
    }

    #[test]
    fn status_errors_are_user_friendly() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED),
            "API key is invalid or expired"
        );
        assert!(status_error(StatusCode::BAD_GATEWAY).contains("HTTP 502"));
    }

    #[test]
    fn query_string_renders_filters_order_and_limit() {
        let q = Query::new()
            .filter("status", "pending")
            .order_by("created_at", SortDir::Desc)
            .limit(5);
        assert_eq!(
            query_string(&q),
            "?status=eq.pending&order=created_at.desc&limit=5"
        );
        assert_eq!(query_string(&Query::new()), "");

        let joined = Query::new().join(crate::store::Join::customer_name());
        assert_eq!(query_string(&joined), "?select=*,customers(name)");
    }

    #[test]
    fn snapshot_diff_classifies_inserts_updates_and_deletes() {
        let prev = index_rows(
            "orders",
            vec![
                json!({ "id": "a", "status": "pending" }),
                json!({ "id": "b", "status": "shipped" }),
            ],
        );
        let next = index_rows(
            "orders",
            vec![
                json!({ "id": "a", "status": "processing" }),
                json!({ "id": "c", "status": "pending" }),
            ],
        );

        let events = diff_snapshots(&prev, &next);
        let kind_of = |id: &str| {
            events
                .iter()
                .find(|e| e.record_id().as_deref() == Some(id))
                .map(|e| e.kind)
        };
        assert_eq!(kind_of("a"), Some(EventKind::Update));
        assert_eq!(kind_of("c"), Some(EventKind::Insert));
        assert_eq!(kind_of("b"), Some(EventKind::Delete));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn snapshot_diff_of_identical_snapshots_is_empty() {
        let rows = index_rows("orders", vec![json!({ "id": "a", "status": "pending" })]);
        assert!(diff_snapshots(&rows, &rows).is_empty());
    }

    #[test]
    fn rows_without_ids_are_dropped_from_the_snapshot() {
        let indexed = index_rows(
            "orders",
            vec![json!({ "status": "pending" }), json!({ "id": "a" })],
        );
        assert_eq!(indexed.len(), 1);
    }
}
