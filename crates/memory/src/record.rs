//! The whole contents of one namespace, plus per-namespace lock sharding.
//!
//! Backends that cannot do partial updates (in-process maps, JSON files,
//! remote blobs) keep a [`NamespaceRecord`] per namespace and mutate it
//! under that namespace's lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wardline_core::memory::Namespace;

/// Key-value pairs and named lists stored under one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    #[serde(default)]
    pub kv: BTreeMap<String, Value>,
    #[serde(default)]
    pub lists: BTreeMap<String, Vec<Value>>,
}

impl NamespaceRecord {
    pub fn is_empty(&self) -> bool {
        self.kv.is_empty() && self.lists.values().all(Vec::is_empty)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.kv.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.kv.keys().cloned().collect()
    }

    pub fn append(&mut self, list: &str, value: Value) -> usize {
        let items = self.lists.entry(list.to_string()).or_default();
        items.push(value);
        items.len()
    }

    pub fn list(&self, list: &str) -> Vec<Value> {
        self.lists.get(list).cloned().unwrap_or_default()
    }

    pub fn list_length(&self, list: &str) -> usize {
        self.lists.get(list).map_or(0, Vec::len)
    }

    /// Drop the oldest items so that at most `keep` remain.
    pub fn trim(&mut self, list: &str, keep: usize) -> usize {
        let Some(items) = self.lists.get_mut(list) else {
            return 0;
        };
        let excess = items.len().saturating_sub(keep);
        items.drain(..excess);
        excess
    }

    pub fn clear_list(&mut self, list: &str) {
        self.lists.remove(list);
    }
}

/// Lazily created per-namespace async locks.
pub(crate) struct Shards<T> {
    shards: Mutex<HashMap<Namespace, Arc<tokio::sync::Mutex<T>>>>,
}

impl<T: Default> Shards<T> {
    pub(crate) fn new() -> Self {
        Self {
            shards: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, ns: &Namespace) -> Arc<tokio::sync::Mutex<T>> {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        shards.entry(ns.clone()).or_default().clone()
    }

    pub(crate) fn namespaces(&self) -> Vec<Namespace> {
        let shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<Namespace> = shards.keys().cloned().collect();
        names.sort();
        names
    }
}
