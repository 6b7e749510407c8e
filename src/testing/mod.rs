use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::database::{RelationalStore, StoredRow};
use crate::error::MigrationError;
use crate::index::{BulkItem, BulkItemError, BulkOperation, BulkResponse, SearchIndex, VERSION_CONFLICT};
use crate::transform::Transformer;
use crate::types::{Document, MutationRecord};

/// Calls observed by `MemoryStore`, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Fetch { table: String, ids: Vec<String> },
    Replace { table: String, ids: Vec<String>, backed_up: usize },
    Delete { table: String, ids: Vec<String> },
    Restore { table: String, ids: Vec<String> },
}

type ReplaceHook = Arc<dyn Fn(&str, &[String]) -> usize + Send + Sync>;

/// In-memory relational store: table -> id -> document text
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    events: Mutex<Vec<StoreEvent>>,
    on_replace: Mutex<Option<ReplaceHook>>,
    failing_table: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: &str, id: &str, data: &str) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), data.to_string());
    }

    pub fn get(&self, table: &str, id: &str) -> Option<String> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|rows| rows.get(id).cloned())
    }

    pub fn count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    pub fn clear(&self, table: &str) {
        self.tables.lock().unwrap().remove(table);
    }

    /// Every non-empty table, for before/after comparison
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.tables
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(table, rows)| (table.clone(), rows.clone()))
            .collect()
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Run `hook` at the start of every replace; its result lands in `StoreEvent::Replace`
    pub fn on_replace(&self, hook: impl Fn(&str, &[String]) -> usize + Send + Sync + 'static) {
        *self.on_replace.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Make every write to `table` fail with a persistence error
    pub fn fail_writes_to(&self, table: &str) {
        *self.failing_table.lock().unwrap() = Some(table.to_string());
    }

    fn check_writable(&self, table: &str) -> Result<(), MigrationError> {
        match self.failing_table.lock().unwrap().as_deref() {
            Some(failing) if failing == table => Err(MigrationError::persistence(format!(
                "insert on {}: simulated failure",
                table
            ))),
            _ => Ok(()),
        }
    }

    fn record(&self, event: StoreEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn parent_of(data: &str) -> String {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("__parent").and_then(|p| p.as_str()).map(str::to_string))
        .unwrap_or_default()
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn fetch_rows(&self, table: &str, ids: &[String]) -> Result<Vec<StoredRow>, MigrationError> {
        self.record(StoreEvent::Fetch {
            table: table.to_string(),
            ids: ids.to_vec(),
        });
        let tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                rows.get(id).map(|data| StoredRow {
                    id: id.clone(),
                    parent: parent_of(data),
                    data: Document::new(data.clone()),
                })
            })
            .collect())
    }

    async fn replace_rows(
        &self,
        table: &str,
        delete_ids: &[String],
        rows: &[StoredRow],
    ) -> Result<(), MigrationError> {
        let hook = self.on_replace.lock().unwrap().clone();
        let backed_up = hook.map(|hook| hook(table, delete_ids)).unwrap_or(0);
        self.record(StoreEvent::Replace {
            table: table.to_string(),
            ids: delete_ids.to_vec(),
            backed_up,
        });
        self.check_writable(table)?;

        let mut tables = self.tables.lock().unwrap();
        let entries = tables.entry(table.to_string()).or_default();
        for id in delete_ids {
            entries.remove(id);
        }
        for row in rows {
            if entries.contains_key(&row.id) {
                return Err(MigrationError::persistence(format!(
                    "insert on {}: duplicate key {}",
                    table, row.id
                )));
            }
            entries.insert(row.id.clone(), row.data.as_str().to_string());
        }
        Ok(())
    }

    async fn delete_rows(&self, table: &str, ids: &[String]) -> Result<u64, MigrationError> {
        self.record(StoreEvent::Delete {
            table: table.to_string(),
            ids: ids.to_vec(),
        });
        self.check_writable(table)?;
        let mut tables = self.tables.lock().unwrap();
        let Some(entries) = tables.get_mut(table) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| entries.remove(*id).is_some()).count() as u64)
    }

    async fn restore_rows(&self, table: &str, rows: &[StoredRow]) -> Result<(), MigrationError> {
        self.record(StoreEvent::Restore {
            table: table.to_string(),
            ids: rows.iter().map(|r| r.id.clone()).collect(),
        });
        self.check_writable(table)?;
        let mut tables = self.tables.lock().unwrap();
        let entries = tables.entry(table.to_string()).or_default();
        for row in rows {
            entries.insert(row.id.clone(), row.data.as_str().to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub version: i64,
    pub routing: Option<String>,
    pub source: String,
}

/// In-memory search index with external versioning
#[derive(Default)]
pub struct MemoryIndex {
    documents: Mutex<HashMap<(String, String), IndexedDocument>>,
    bulk_sizes: Mutex<Vec<usize>>,
    rejected: Mutex<HashMap<String, String>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, index_type: &str, id: &str, version: i64, source: &str) {
        self.documents.lock().unwrap().insert(
            (index_type.to_string(), id.to_string()),
            IndexedDocument {
                version,
                routing: None,
                source: source.to_string(),
            },
        );
    }

    pub fn document(&self, index_type: &str, id: &str) -> Option<IndexedDocument> {
        self.documents
            .lock()
            .unwrap()
            .get(&(index_type.to_string(), id.to_string()))
            .cloned()
    }

    /// Fail every item for `id` with an error of type `kind`
    pub fn reject_id(&self, id: &str, kind: &str) {
        self.rejected
            .lock()
            .unwrap()
            .insert(id.to_string(), kind.to_string());
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_sizes.lock().unwrap().len()
    }

    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.bulk_sizes.lock().unwrap().clone()
    }

    fn failure(id: &str, status: u16, kind: &str, reason: String) -> BulkItem {
        BulkItem {
            id: id.to_string(),
            doc_type: None,
            status,
            error: Some(BulkItemError {
                kind: kind.to_string(),
                reason,
            }),
        }
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, MigrationError> {
        self.bulk_sizes.lock().unwrap().push(operations.len());
        let rejected = self.rejected.lock().unwrap().clone();
        let mut documents = self.documents.lock().unwrap();
        let mut response = BulkResponse::default();

        for operation in operations {
            let key = (operation.index_type().to_string(), operation.id().to_string());
            let (action, item) = if let Some(kind) = rejected.get(operation.id()) {
                let action = match operation {
                    BulkOperation::Index { .. } => "index",
                    BulkOperation::Delete { .. } => "delete",
                };
                (action, Self::failure(operation.id(), 400, kind, "rejected".to_string()))
            } else {
                match operation {
                    BulkOperation::Index {
                        id,
                        version,
                        routing,
                        document,
                        ..
                    } => match documents.get(&key).map(|current| current.version) {
                        Some(current) if current >= *version => (
                            "index",
                            Self::failure(
                                id,
                                409,
                                VERSION_CONFLICT,
                                format!(
                                    "current version [{}] is higher or equal to the one provided [{}]",
                                    current, version
                                ),
                            ),
                        ),
                        _ => {
                            documents.insert(
                                key,
                                IndexedDocument {
                                    version: *version,
                                    routing: routing.clone(),
                                    source: document.as_str().to_string(),
                                },
                            );
                            let item = BulkItem {
                                id: id.clone(),
                                status: 201,
                                ..BulkItem::default()
                            };
                            ("index", item)
                        }
                    },
                    BulkOperation::Delete { id, .. } => {
                        let status = if documents.remove(&key).is_some() { 200 } else { 404 };
                        let item = BulkItem {
                            id: id.clone(),
                            status,
                            ..BulkItem::default()
                        };
                        ("delete", item)
                    }
                }
            };
            response.errors |= item.error.is_some();
            response.items.push(HashMap::from([(action.to_string(), item)]));
        }
        Ok(response)
    }
}

/// Transformer that copies each origin record into one table unchanged
pub struct ScriptedTransformer {
    table: String,
    query: String,
    fail_on: Option<String>,
}

impl ScriptedTransformer {
    pub fn copy_to(table: &str) -> Self {
        Self {
            table: table.to_string(),
            query: format!("SELECT id, data FROM {}", table),
            fail_on: None,
        }
    }

    /// Report the plugin error sentinel for `id`
    pub fn failing_on(mut self, id: &str) -> Self {
        self.fail_on = Some(id.to_string());
        self
    }
}

#[async_trait]
impl Transformer for ScriptedTransformer {
    async fn describe_query(&mut self) -> Result<String, MigrationError> {
        Ok(self.query.clone())
    }

    async fn apply(&mut self, id: &str, data: &Document) -> Result<Vec<MutationRecord>, MigrationError> {
        if self.fail_on.as_deref() == Some(id) {
            return Err(MigrationError::transform(id, "plugin reported error"));
        }
        Ok(vec![MutationRecord::upsert(&self.table, id, data.clone())])
    }
}
