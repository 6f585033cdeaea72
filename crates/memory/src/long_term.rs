//! Long-term memory: a structured fact map persisted across sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};

pub const LONG_TERM_KEY: &str = "long_term";

/// Cached view of the `long_term` key.
///
/// Reads within `cache_ttl` of the last load or write are served from the
/// cache. A zero TTL disables caching.
pub struct LongTermMemory {
    store: Arc<dyn MemoryStore>,
    namespace: Namespace,
    cache_ttl: Duration,
    cache: Option<(Map<String, Value>, Instant)>,
}

impl LongTermMemory {
    pub fn new(store: Arc<dyn MemoryStore>, namespace: Namespace, cache_ttl: Duration) -> Self {
        Self {
            store,
            namespace,
            cache_ttl,
            cache: None,
        }
    }

    /// Current facts, from cache when fresh.
    pub async fn get(&mut self) -> Result<Map<String, Value>, MemoryError> {
        if let Some((data, at)) = &self.cache {
            if !self.cache_ttl.is_zero() && at.elapsed() < self.cache_ttl {
                return Ok(data.clone());
            }
        }

        let data = match self.store.get(&self.namespace, LONG_TERM_KEY).await? {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(MemoryError::Corrupted {
                    namespace: self.namespace.to_string(),
                    key: LONG_TERM_KEY.into(),
                    reason: format!("expected a JSON object, found {other}"),
                });
            }
        };
        self.cache = Some((data.clone(), Instant::now()));
        Ok(data)
    }

    /// The most recently loaded facts, without touching the store.
    pub fn cached(&self) -> Option<&Map<String, Value>> {
        self.cache.as_ref().map(|(data, _)| data)
    }

    /// Replace the stored facts.
    pub async fn save(&mut self, data: Map<String, Value>) -> Result<(), MemoryError> {
        self.store
            .set(&self.namespace, LONG_TERM_KEY, Value::Object(data.clone()))
            .await?;
        self.cache = Some((data, Instant::now()));
        Ok(())
    }

    /// Merge `updates` into the stored facts and save. Returns the result.
    pub async fn update(
        &mut self,
        updates: Map<String, Value>,
    ) -> Result<Map<String, Value>, MemoryError> {
        let mut current = self.get().await?;
        merge_facts(&mut current, updates);
        self.save(current.clone()).await?;
        Ok(current)
    }

    pub async fn delete(&mut self) -> Result<(), MemoryError> {
        self.store.delete(&self.namespace, LONG_TERM_KEY).await?;
        self.cache = Some((Map::new(), Instant::now()));
        Ok(())
    }

    /// Force the next `get` to read the store.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }
}

/// Merge `updates` into `base`.
///
/// Each top-level key is overwritten, except that two objects merge
/// recursively. Scalars and arrays are replaced outright; `null` values in
/// `updates` are skipped.
pub fn merge_facts(base: &mut Map<String, Value>, updates: Map<String, Value>) {
    for (key, incoming) in updates {
        match incoming {
            Value::Null => {}
            Value::Object(nested) => match base.get_mut(&key) {
                Some(Value::Object(existing)) => merge_facts(existing, nested),
                _ => {
                    base.insert(key, Value::Object(nested));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}
