// Shared types used across the pipeline

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Mutation kinds a transformation step can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Upsert,
    Delete,
}

/// An opaque JSON document kept in its serialized form.
///
/// The pipeline never inspects document contents; it only moves them between the relational
/// store, the backup log and the search index. Deserializes from either a JSON string holding the
/// document or an inline JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document(String);

impl Document {
    pub fn new(raw: impl Into<String>) -> Self {
        Document(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Document {
    fn from(raw: String) -> Self {
        Document(raw)
    }
}

impl From<&str> for Document {
    fn from(raw: &str) -> Self {
        Document(raw.to_string())
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(raw) => Ok(Document(raw)),
            Value::Null => Ok(Document::default()),
            other => Ok(Document(other.to_string())),
        }
    }
}

/// One row as read from the origin query, before transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRecord {
    pub id: String,
    pub data: Document,
}

/// A single mutation instruction produced by the transformation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    #[serde(alias = "Table")]
    pub table: String,
    #[serde(alias = "Action")]
    pub action: Action,
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "Data", default)]
    pub data: Document,
    #[serde(alias = "Parent", default, deserialize_with = "empty_as_none")]
    pub parent: Option<String>,
    #[serde(
        rename = "updatedAt",
        alias = "UpdatedAt",
        alias = "updated_at",
        default,
        deserialize_with = "empty_as_none"
    )]
    pub updated_at: Option<String>,
}

impl MutationRecord {
    pub fn upsert(table: &str, id: &str, data: impl Into<Document>) -> Self {
        Self {
            table: table.to_string(),
            action: Action::Upsert,
            id: id.to_string(),
            data: data.into(),
            parent: None,
            updated_at: None,
        }
    }

    pub fn delete(table: &str, id: &str) -> Self {
        Self {
            table: table.to_string(),
            action: Action::Delete,
            id: id.to_string(),
            data: Document::default(),
            parent: None,
            updated_at: None,
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn with_updated_at(mut self, updated_at: &str) -> Self {
        self.updated_at = Some(updated_at.to_string());
        self
    }
}

// Go-era plugins emit "" for absent optional fields
fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
