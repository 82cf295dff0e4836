use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::{
    path::Path,
    str,
    sync::{Mutex, MutexGuard},
};

use super::{ensure_id, merge, Document, DocumentStore, Filter, StoreError};

/// RocksDB-backed document store. Documents live under
/// `{collection}:{id}` keys as JSON.
///
/// Read-modify-write paths (`update`, `delete`) hold `writes` so two patches
/// to the same document cannot drop each other's fields.
pub struct DBLayer {
    db: DB,
    writes: Mutex<()>,
}

impl DBLayer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            writes: Mutex::new(()),
        })
    }

    fn write_lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.writes
            .lock()
            .map_err(|_| StoreError::Unavailable("write lock poisoned".into()))
    }

    fn collection_prefix(collection: &str) -> String {
        format!("{collection}:")
    }

    fn doc_key(collection: &str, id: &str) -> String {
        format!("{collection}:{id}")
    }

    fn load(&self, key: &str) -> Result<Option<Document>, StoreError> {
        self.db
            .get(key)?
            .map(|raw| serde_json::from_slice::<Document>(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    fn scan(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let prefix = Self::collection_prefix(collection);
        let mut out = Vec::new();

        for item in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, val) = item?;
            let k = str::from_utf8(&key)?;
            if !k.starts_with(&prefix) {
                break;
            }
            out.push(serde_json::from_slice(&val)?);
        }

        Ok(out)
    }

    fn put(&self, key: &str, doc: &Document) -> Result<(), StoreError> {
        let val = serde_json::to_vec(doc)?;
        self.db.put(key, val)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for DBLayer {
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .scan(collection)?
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.load(&Self::doc_key(collection, id))
    }

    async fn create(&self, collection: &str, mut doc: Document) -> Result<String, StoreError> {
        let id = ensure_id(&mut doc);
        self.put(&Self::doc_key(collection, &id), &doc)?;
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
    ) -> Result<bool, StoreError> {
        let key = Self::doc_key(collection, id);
        let _guard = self.write_lock()?;
        let Some(mut doc) = self.load(&key)? else {
            return Ok(false);
        };
        merge(&mut doc, patch);
        self.put(&key, &doc)?;
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let key = Self::doc_key(collection, id);
        let _guard = self.write_lock()?;
        if self.db.get(&key)?.is_none() {
            return Ok(false);
        }
        self.db.delete(key)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn stores_and_queries_by_collection() {
        let dir = tempfile::tempdir().unwrap();
        let db = DBLayer::new(dir.path()).unwrap();

        let id = db
            .create("devices", doc(json!({ "user_id": "u1", "name": "laptop" })))
            .await
            .unwrap();
        db.create("devices", doc(json!({ "user_id": "u2", "name": "phone" })))
            .await
            .unwrap();
        // Shares the "devices" prefix but is a different collection.
        db.create("devices_archive", doc(json!({ "user_id": "u1" })))
            .await
            .unwrap();

        let found = db
            .query("devices", &Filter::new().eq("user_id", "u1"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], json!(id));
        assert_eq!(found[0]["name"], json!("laptop"));
    }

    #[tokio::test]
    async fn update_merges_and_delete_removes() {
        let dir = tempfile::tempdir().unwrap();
        let db = DBLayer::new(dir.path()).unwrap();

        let id = db
            .create("devices", doc(json!({ "is_online": true, "name": "laptop" })))
            .await
            .unwrap();

        assert!(db
            .update("devices", &id, doc(json!({ "is_online": false })))
            .await
            .unwrap());
        let stored = db.get("devices", &id).await.unwrap().unwrap();
        assert_eq!(stored["is_online"], json!(false));
        assert_eq!(stored["name"], json!("laptop"));

        assert!(!db
            .update("devices", "missing", doc(json!({ "x": 1 })))
            .await
            .unwrap());

        assert!(db.delete("devices", &id).await.unwrap());
        assert!(!db.delete("devices", &id).await.unwrap());
        assert!(db.get("devices", &id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_patches_to_one_document_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let db = std::sync::Arc::new(DBLayer::new(dir.path()).unwrap());
        let id = db
            .create("devices", doc(json!({ "user_id": "u1" })))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let db = db.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                let mut patch = Document::new();
                patch.insert(format!("field_{i}"), json!(i));
                db.update("devices", &id, patch).await.unwrap()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let stored = db.get("devices", &id).await.unwrap().unwrap();
        for i in 0..32 {
            assert_eq!(stored[&format!("field_{i}")], json!(i));
        }
        assert_eq!(stored["user_id"], json!("u1"));
    }
}
