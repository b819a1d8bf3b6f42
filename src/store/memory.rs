//! In-memory document store
//!
//! Backs the test suite and quick local experiments. Collections live in a
//! `RwLock`-guarded map; deterministic iteration comes from `BTreeMap`.
//! Failure injection lets tests exercise the best-effort deletion path and
//! the verification-mismatch path without a real backend.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::error::{SweepError, SweepResult};
use crate::store::{Document, DocumentStore};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
    /// Ids whose deletion fails with a write error
    fail_deletes: RwLock<HashSet<String>>,
    /// When set, deletions report success but remove nothing. Exists to
    /// simulate a backend (or logic defect) that leaves orphans behind.
    ignore_deletes: RwLock<bool>,
    delete_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document, keyed by its `id` field
    pub async fn insert(&self, collection: &str, doc: Document) -> SweepResult<()> {
        let id = doc
            .get("id")
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| SweepError::InvalidRecord {
                collection: collection.to_string(),
                detail: "document has no usable 'id' field".to_string(),
            })?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id, doc);
        Ok(())
    }

    /// Insert a document under an explicit key, bypassing id extraction.
    /// Lets tests stage malformed documents the way a foreign writer could.
    pub async fn insert_with_key(&self, collection: &str, key: &str, doc: Document) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
    }

    /// Seed a collection from a batch of documents
    pub async fn seed(&self, collection: &str, docs: Vec<Document>) -> SweepResult<()> {
        for doc in docs {
            self.insert(collection, doc).await?;
        }
        Ok(())
    }

    pub async fn contains(&self, collection: &str, id: &str) -> bool {
        self.collections
            .read()
            .await
            .get(collection)
            .is_some_and(|c| c.contains_key(id))
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Number of delete calls issued against this store so far
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Make future deletions of `id` fail with a write error
    pub async fn fail_delete_of(&self, id: &str) {
        self.fail_deletes.write().await.insert(id.to_string());
    }

    /// Make future deletions succeed without removing anything
    pub async fn ignore_deletes(&self) {
        *self.ignore_deletes.write().await = true;
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn scan(&self, collection: &str) -> SweepResult<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn ids(&self, collection: &str) -> SweepResult<HashSet<String>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, id: &str) -> SweepResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.read().await.contains(id) {
            return Err(SweepError::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
                detail: "injected write failure".to_string(),
            });
        }
        if *self.ignore_deletes.read().await {
            return Ok(());
        }
        if let Some(c) = self.collections.write().await.get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }
}
