//! Adapter over an external, remotely hosted memory service.
//!
//! The service itself is not part of this crate. It only needs to fetch,
//! replace and delete whole [`NamespaceRecord`]s; [`RemoteStore`] turns that
//! into the full [`MemoryStore`] capability with read-modify-write under a
//! per-namespace lock.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};

use crate::record::{NamespaceRecord, Shards};

/// The operations a remote memory service must provide.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, ns: &Namespace) -> Result<Option<NamespaceRecord>, MemoryError>;

    async fn put(&self, ns: &Namespace, record: &NamespaceRecord) -> Result<(), MemoryError>;

    async fn remove(&self, ns: &Namespace) -> Result<(), MemoryError>;
}

pub struct RemoteStore<B> {
    backend: B,
    shards: Shards<()>,
}

impl<B: RemoteBackend> RemoteStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            shards: Shards::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn update<R>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&mut NamespaceRecord) -> R,
    ) -> Result<R, MemoryError> {
        let shard = self.shards.get(ns);
        let _guard = shard.lock().await;
        let mut rec = self.backend.fetch(ns).await?.unwrap_or_default();
        let out = f(&mut rec);
        if rec.is_empty() {
            self.backend.remove(ns).await?;
        } else {
            self.backend.put(ns, &rec).await?;
        }
        debug!(backend = self.backend.name(), namespace = %ns, "Remote namespace written");
        Ok(out)
    }

    async fn read<R>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&NamespaceRecord) -> R,
    ) -> Result<R, MemoryError> {
        let rec = self.backend.fetch(ns).await?.unwrap_or_default();
        Ok(f(&rec))
    }
}

#[async_trait]
impl<B: RemoteBackend> MemoryStore for RemoteStore<B> {
    fn name(&self) -> &str {
        "remote"
    }

    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Value>, MemoryError> {
        self.read(ns, |rec| rec.kv.get(key).cloned()).await
    }

    async fn set(&self, ns: &Namespace, key: &str, value: Value) -> Result<(), MemoryError> {
        self.update(ns, |rec| {
            rec.kv.insert(key.to_string(), value);
        })
        .await
    }

    async fn delete(&self, ns: &Namespace, key: &str) -> Result<bool, MemoryError> {
        self.update(ns, |rec| rec.delete(key)).await
    }

    async fn list_keys(&self, ns: &Namespace) -> Result<Vec<String>, MemoryError> {
        self.read(ns, NamespaceRecord::keys).await
    }

    async fn append(&self, ns: &Namespace, list: &str, value: Value) -> Result<usize, MemoryError> {
        self.update(ns, |rec| rec.append(list, value)).await
    }

    async fn get_list(&self, ns: &Namespace, list: &str) -> Result<Vec<Value>, MemoryError> {
        self.read(ns, |rec| rec.list(list)).await
    }

    async fn trim_list(
        &self,
        ns: &Namespace,
        list: &str,
        keep: usize,
    ) -> Result<usize, MemoryError> {
        self.update(ns, |rec| rec.trim(list, keep)).await
    }

    async fn clear_list(&self, ns: &Namespace, list: &str) -> Result<(), MemoryError> {
        self.update(ns, |rec| rec.clear_list(list)).await
    }

    async fn list_length(&self, ns: &Namespace, list: &str) -> Result<usize, MemoryError> {
        self.read(ns, |rec| rec.list_length(list)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeService {
        records: Mutex<HashMap<Namespace, NamespaceRecord>>,
        puts: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RemoteBackend for FakeService {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch(&self, ns: &Namespace) -> Result<Option<NamespaceRecord>, MemoryError> {
            if self.fail {
                return Err(MemoryError::Storage("service unavailable".into()));
            }
            Ok(self.records.lock().unwrap().get(ns).cloned())
        }

        async fn put(&self, ns: &Namespace, record: &NamespaceRecord) -> Result<(), MemoryError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.records.lock().unwrap().insert(ns.clone(), record.clone());
            Ok(())
        }

        async fn remove(&self, ns: &Namespace) -> Result<(), MemoryError> {
            self.records.lock().unwrap().remove(ns);
            Ok(())
        }
    }

    #[tokio::test]
    async fn operations_map_onto_whole_records() {
        let store = RemoteStore::new(FakeService::default());
        let ns = Namespace::for_session("bot", "u1");

        store.set(&ns, "long_term", json!({"a": 1})).await.unwrap();
        store.append(&ns, "short_term", json!("x")).await.unwrap();
        store.append(&ns, "short_term", json!("y")).await.unwrap();
        assert_eq!(store.trim_list(&ns, "short_term", 1).await.unwrap(), 1);

        assert_eq!(store.get(&ns, "long_term").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.get_list(&ns, "short_term").await.unwrap(), vec![json!("y")]);
        assert_eq!(store.backend().puts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn emptied_namespace_is_removed_remotely() {
        let store = RemoteStore::new(FakeService::default());
        let ns = Namespace::from("a:b");
        store.set(&ns, "k", json!(1)).await.unwrap();
        assert!(store.delete(&ns, "k").await.unwrap());
        assert!(store.backend().records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn service_errors_propagate() {
        let store = RemoteStore::new(FakeService {
            fail: true,
            ..Default::default()
        });
        let ns = Namespace::from("a:b");
        assert!(store.get(&ns, "k").await.is_err());
        assert!(store.append(&ns, "l", json!(1)).await.is_err());
    }
}
