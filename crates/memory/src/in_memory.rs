//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use serde_json::Value;
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};

use crate::record::{NamespaceRecord, Shards};

/// A non-persistent store with one lock per namespace.
pub struct InMemoryStore {
    shards: Shards<NamespaceRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            shards: Shards::new(),
        }
    }

    /// Namespaces that have been touched, sorted.
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.shards.namespaces()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Value>, MemoryError> {
        let shard = self.shards.get(ns);
        let rec = shard.lock().await;
        Ok(rec.kv.get(key).cloned())
    }

    async fn set(&self, ns: &Namespace, key: &str, value: Value) -> Result<(), MemoryError> {
        let shard = self.shards.get(ns);
        shard.lock().await.kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, ns: &Namespace, key: &str) -> Result<bool, MemoryError> {
        let shard = self.shards.get(ns);
        let existed = shard.lock().await.delete(key);
        Ok(existed)
    }

    async fn list_keys(&self, ns: &Namespace) -> Result<Vec<String>, MemoryError> {
        let shard = self.shards.get(ns);
        let keys = shard.lock().await.keys();
        Ok(keys)
    }

    async fn append(&self, ns: &Namespace, list: &str, value: Value) -> Result<usize, MemoryError> {
        let shard = self.shards.get(ns);
        let len = shard.lock().await.append(list, value);
        Ok(len)
    }

    async fn get_list(&self, ns: &Namespace, list: &str) -> Result<Vec<Value>, MemoryError> {
        let shard = self.shards.get(ns);
        let items = shard.lock().await.list(list);
        Ok(items)
    }

    async fn trim_list(
        &self,
        ns: &Namespace,
        list: &str,
        keep: usize,
    ) -> Result<usize, MemoryError> {
        let shard = self.shards.get(ns);
        let removed = shard.lock().await.trim(list, keep);
        Ok(removed)
    }

    async fn clear_list(&self, ns: &Namespace, list: &str) -> Result<(), MemoryError> {
        let shard = self.shards.get(ns);
        shard.lock().await.clear_list(list);
        Ok(())
    }

    async fn list_length(&self, ns: &Namespace, list: &str) -> Result<usize, MemoryError> {
        let shard = self.shards.get(ns);
        let len = shard.lock().await.list_length(list);
        Ok(len)
    }
}
