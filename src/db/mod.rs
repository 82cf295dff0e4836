use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

#[cfg(test)]
pub mod memory;
mod rocks;

pub use rocks::DBLayer;

pub const USERS: &str = "users";
pub const DEVICES: &str = "devices";
pub const AUDIT_LOGS: &str = "audit_logs";
pub const CLIPBOARD_ITEMS: &str = "clipboard_items";

/// A stored record. Every document carries its own `id` field.
pub type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Unavailable(format!("malformed document: {err}"))
    }
}

impl From<std::str::Utf8Error> for StoreError {
    fn from(err: std::str::Utf8Error) -> Self {
        StoreError::Unavailable(format!("malformed key: {err}"))
    }
}

/// Conjunction of equality clauses over dotted field paths,
/// e.g. `metadata.device_signature`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((path.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(path, expected)| lookup(doc, path) == Some(expected))
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// Narrow document-store contract the services talk to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Stores `doc` and returns its id. A missing `id` field is generated.
    async fn create(&self, collection: &str, doc: Document) -> Result<String, StoreError>;

    /// Merges the top-level keys of `patch` into the document.
    /// Returns `false` when no document has that id.
    async fn update(&self, collection: &str, id: &str, patch: Document)
        -> Result<bool, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Unavailable(format!(
            "expected an object document, got {other}"
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Assigns a fresh id unless the document already has a non-empty one.
pub(crate) fn ensure_id(doc: &mut Document) -> String {
    match doc.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            doc.insert("id".into(), Value::String(id.clone()));
            id
        }
    }
}

pub(crate) fn merge(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}
