//! Memory store trait: the storage capability behind a memory session.
//!
//! A store is a namespaced key-value map plus namespaced append-only lists.
//! Each `(agent_id, user_id)` pair gets its own [`Namespace`], so contention
//! is per-session and never global.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MemoryError;

/// Storage partition for one `(agent_id, user_id)` session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// The namespace `"{agent_id}:{user_id}"`.
    pub fn for_session(agent_id: &str, user_id: &str) -> Self {
        Self(format!("{agent_id}:{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The core MemoryStore trait.
///
/// Implementations: in-memory (non-persistent), SQLite (durable embedded),
/// JSON files, and a remote adapter. Lists preserve insertion order exactly.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    // --- Key-value ---

    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Value>, MemoryError>;

    async fn set(&self, ns: &Namespace, key: &str, value: Value) -> Result<(), MemoryError>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, ns: &Namespace, key: &str) -> Result<bool, MemoryError>;

    /// Keys in the namespace, sorted.
    async fn list_keys(&self, ns: &Namespace) -> Result<Vec<String>, MemoryError>;

    // --- Lists ---

    /// Append to a list, returning the new length.
    async fn append(&self, ns: &Namespace, list: &str, value: Value) -> Result<usize, MemoryError>;

    /// All items of a list, oldest first.
    async fn get_list(&self, ns: &Namespace, list: &str) -> Result<Vec<Value>, MemoryError>;

    /// Keep only the newest `keep` items. Returns how many were removed.
    async fn trim_list(&self, ns: &Namespace, list: &str, keep: usize)
    -> Result<usize, MemoryError>;

    async fn clear_list(&self, ns: &Namespace, list: &str) -> Result<(), MemoryError>;

    async fn list_length(&self, ns: &Namespace, list: &str) -> Result<usize, MemoryError>;
}
