//! File-based store: one JSON document per namespace.
//!
//! Storage location: `~/.wardline/memory/<namespace>.json`
//!
//! Every mutation rewrites the namespace's file through a temporary file and
//! a rename, so a crash never leaves a half-written document behind. The
//! files are human-inspectable and need no database.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};

use crate::record::{NamespaceRecord, Shards};

/// A durable store writing one JSON file per namespace under `dir`.
pub struct FileStore {
    dir: PathBuf,
    shards: Shards<()>,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File memory store opened");
        Self {
            dir,
            shards: Shards::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file backing `ns`. Characters outside `[A-Za-z0-9._-]` are
    /// percent-encoded so every namespace maps to a distinct file name.
    pub fn path_for(&self, ns: &Namespace) -> PathBuf {
        let mut name = String::with_capacity(ns.as_str().len() + 5);
        for b in ns.as_str().bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{b:02X}"));
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }

    async fn load(&self, ns: &Namespace) -> Result<NamespaceRecord, MemoryError> {
        let path = self.path_for(ns);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(NamespaceRecord::default());
            }
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| MemoryError::Corrupted {
            namespace: ns.to_string(),
            key: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn persist(&self, ns: &Namespace, rec: &NamespaceRecord) -> Result<(), MemoryError> {
        let path = self.path_for(ns);
        if rec.is_empty() {
            return match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(MemoryError::Storage(format!(
                    "Failed to remove {}: {e}",
                    path.display()
                ))),
            };
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            MemoryError::Storage(format!("Failed to create memory directory: {e}"))
        })?;
        let content = serde_json::to_string_pretty(rec)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize namespace: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to replace memory file: {e}")))?;
        Ok(())
    }

    /// Load, mutate and write back a namespace under its lock.
    async fn update<R>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&mut NamespaceRecord) -> R,
    ) -> Result<R, MemoryError> {
        let shard = self.shards.get(ns);
        let _guard = shard.lock().await;
        let mut rec = self.load(ns).await?;
        let out = f(&mut rec);
        self.persist(ns, &rec).await?;
        Ok(out)
    }

    async fn read<R>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&NamespaceRecord) -> R,
    ) -> Result<R, MemoryError> {
        let shard = self.shards.get(ns);
        let _guard = shard.lock().await;
        let rec = self.load(ns).await?;
        Ok(f(&rec))
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    fn name(&self) -> &str {
        "file"
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
