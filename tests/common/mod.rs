#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use pg_es_migration::database::{RelationalStore, StoredRow};
use pg_es_migration::error::MigrationError;
use pg_es_migration::types::Document;

/// A document as the fake cluster stores it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDoc {
    pub version: i64,
    pub parent: Option<String>,
    pub routing: Option<String>,
    pub source: Value,
}

#[derive(Default)]
pub struct FakeState {
    /// (index, type, id) -> document
    pub docs: HashMap<(String, String, String), StoredDoc>,
    /// Raw NDJSON bodies, one per bulk request
    pub bulk_bodies: Vec<String>,
    /// Ids whose items fail with the given error type
    pub rejected: HashMap<String, String>,
}

type Shared = Arc<Mutex<FakeState>>;

/// Minimal Elasticsearch stand-in: `/`, `/_nodes/http` and `/_bulk` with external versioning
pub struct FakeElastic {
    pub port: u16,
    pub base_url: String,
    pub state: Shared,
    task: tokio::task::JoinHandle<()>,
}

impl FakeElastic {
    pub async fn start() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);
        let state: Shared = Arc::new(Mutex::new(FakeState::default()));

        let app = Router::new()
            .route("/", get(root))
            .route("/_nodes/http", get(nodes))
            .route("/_bulk", post(bulk))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind fake elasticsearch")?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let fake = Self {
            port,
            base_url,
            state,
            task,
        };
        fake.wait_ready(Duration::from_secs(5)).await?;
        Ok(fake)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            if let Ok(resp) = client.get(&self.base_url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("fake elasticsearch did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn doc(&self, index: &str, doc_type: &str, id: &str) -> Option<StoredDoc> {
        self.state
            .lock()
            .unwrap()
            .docs
            .get(&(index.to_string(), doc_type.to_string(), id.to_string()))
            .cloned()
    }

    pub fn seed(&self, index: &str, doc_type: &str, id: &str, version: i64, source: Value) {
        self.state.lock().unwrap().docs.insert(
            (index.to_string(), doc_type.to_string(), id.to_string()),
            StoredDoc {
                version,
                parent: None,
                routing: None,
                source,
            },
        );
    }

    pub fn reject(&self, id: &str, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert(id.to_string(), kind.to_string());
    }

    pub fn bulk_bodies(&self) -> Vec<String> {
        self.state.lock().unwrap().bulk_bodies.clone()
    }
}

impl Drop for FakeElastic {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn root() -> Json<Value> {
    Json(json!({ "name": "fake", "version": { "number": "5.6.16" } }))
}

async fn nodes(State(_): State<Shared>, headers: axum::http::HeaderMap) -> Json<Value> {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("127.0.0.1:9200")
        .to_string();
    Json(json!({
        "nodes": {
            "n1": { "http": { "publish_address": host } }
        }
    }))
}

async fn bulk(State(state): State<Shared>, body: String) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.bulk_bodies.push(body.clone());

    let mut items = Vec::new();
    let mut errors = false;
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());

    while let Some(line) = lines.next() {
        let action: Value = serde_json::from_str(line).unwrap_or(Value::Null);
        let Some((name, meta)) = action.as_object().and_then(|o| o.iter().next()) else {
            continue;
        };
        let name = name.clone();
        let meta = meta.clone();
        let field = |key: &str| meta.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let index = field("_index").unwrap_or_default();
        let doc_type = field("_type").unwrap_or_else(|| "_doc".to_string());
        let id = field("_id").unwrap_or_default();
        let key = (index, doc_type.clone(), id.clone());

        let source = if name == "index" {
            lines
                .next()
                .and_then(|l| serde_json::from_str::<Value>(l).ok())
                .unwrap_or(Value::Null)
        } else {
            Value::Null
        };

        let mut item = json!({ "_id": id, "_type": doc_type });
        if let Some(kind) = state.rejected.get(&id).cloned() {
            item["status"] = json!(400);
            item["error"] = json!({ "type": kind, "reason": "rejected by test" });
        } else if name == "index" {
            let version = meta.get("version").and_then(|v| v.as_i64()).unwrap_or(1);
            match state.docs.get(&key).map(|doc| doc.version) {
                Some(current) if current >= version => {
                    item["status"] = json!(409);
                    item["error"] = json!({
                        "type": "version_conflict_engine_exception",
                        "reason": format!("[{}]: version conflict, current version [{}] is higher or equal to the one provided [{}]", id, current, version),
                    });
                }
                _ => {
                    state.docs.insert(
                        key,
                        StoredDoc {
                            version,
                            parent: field("parent"),
                            routing: field("routing"),
                            source,
                        },
                    );
                    item["status"] = json!(201);
                }
            }
        } else {
            let found = state.docs.remove(&key).is_some();
            item["status"] = json!(if found { 200 } else { 404 });
        }

        errors |= item.get("error").is_some();
        items.push(json!({ name: item }));
    }

    Json(json!({ "took": 1, "errors": errors, "items": items }))
}

/// Relational store over a map, for driving the engine against the fake cluster
#[derive(Default)]
pub struct MapStore {
    pub tables: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MapStore {
    pub fn seed(&self, table: &str, id: &str, data: &str) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), data.to_string());
    }

    pub fn get(&self, table: &str, id: &str) -> Option<String> {
        self.tables.lock().unwrap().get(table)?.get(id).cloned()
    }
}

#[async_trait::async_trait]
impl RelationalStore for MapStore {
    async fn fetch_rows(&self, table: &str, ids: &[String]) -> Result<Vec<StoredRow>, MigrationError> {
        let tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                let data = rows.get(id)?;
                let parent = serde_json::from_str::<Value>(data)
                    .ok()
                    .and_then(|v| v.get("__parent")?.as_str().map(str::to_string))
                    .unwrap_or_default();
                Some(StoredRow {
                    id: id.clone(),
                    parent,
                    data: Document::new(data.clone()),
                })
            })
            .collect())
    }

    async fn replace_rows(&self, table: &str, delete_ids: &[String], rows: &[StoredRow]) -> Result<(), MigrationError> {
        let mut tables = self.tables.lock().unwrap();
        let entries = tables.entry(table.to_string()).or_default();
        for id in delete_ids {
            entries.remove(id);
        }
        for row in rows {
            entries.insert(row.id.clone(), row.data.as_str().to_string());
        }
        Ok(())
    }

    async fn delete_rows(&self, table: &str, ids: &[String]) -> Result<u64, MigrationError> {
        let mut tables = self.tables.lock().unwrap();
        let Some(entries) = tables.get_mut(table) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| entries.remove(*id).is_some()).count() as u64)
    }

    async fn restore_rows(&self, table: &str, rows: &[StoredRow]) -> Result<(), MigrationError> {
        let mut tables = self.tables.lock().unwrap();
        let entries = tables.entry(table.to_string()).or_default();
        for row in rows {
            entries.insert(row.id.clone(), row.data.as_str().to_string());
        }
        Ok(())
    }
}
