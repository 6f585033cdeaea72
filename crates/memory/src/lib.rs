//! Tiered conversational memory for Wardline.
//!
//! Each `(agent_id, user_id)` pair owns a [`MemorySession`] with three tiers:
//! - **working**: scratch state for the current session
//! - **short-term**: the most recent turns, bounded and oldest-evicted
//! - **long-term**: structured facts merged in by an extractor
//!
//! Tiers live in a pluggable [`MemoryStore`]: in-process, JSON files,
//! SQLite (feature `sqlite`, on by default) or a remote service adapter.

pub mod buffer;
pub mod cache;
pub mod extractor;
pub mod file_backend;
pub mod formatter;
pub mod in_memory;
pub mod long_term;
pub mod record;
pub mod remote;
pub mod session;
pub mod short_term;
pub mod working;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use wardline_config::MemoryConfig;
use wardline_core::error::MemoryError;
use wardline_core::memory::MemoryStore;

pub use cache::{SessionManager, SharedSession};
pub use extractor::{LlmMemoryExtractor, MemoryExtractor};
pub use file_backend::FileStore;
pub use formatter::{FormatOptions, format_memory};
pub use in_memory::InMemoryStore;
pub use long_term::merge_facts;
pub use record::NamespaceRecord;
pub use remote::{RemoteBackend, RemoteStore};
pub use session::{
    AddMessageReport, ExtractionFailurePolicy, MemoryContext, MemorySession, SessionSettings,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Open the store named by `[memory] backend`.
pub async fn open_store(config: &MemoryConfig) -> Result<Arc<dyn MemoryStore>, MemoryError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "file" => Ok(Arc::new(FileStore::new(config.resolved_path()))),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.resolved_path();
            let store = SqliteStore::new(&path.to_string_lossy()).await?;
            Ok(Arc::new(store))
        }
        other => Err(MemoryError::Storage(format!(
            "memory backend '{other}' is not available in this build"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_store_by_backend_name() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = MemoryConfig {
            backend: "memory".into(),
            ..Default::default()
        };
        assert_eq!(open_store(&config).await.unwrap().name(), "memory");

        config.backend = "file".into();
        config.path = Some(dir.path().join("mem").to_string_lossy().into_owned());
        assert_eq!(open_store(&config).await.unwrap().name(), "file");

        config.backend = "redis".into();
        assert!(open_store(&config).await.is_err());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig {
            backend: "sqlite".into(),
            path: Some(dir.path().join("memory.db").to_string_lossy().into_owned()),
            ..Default::default()
        };
        assert_eq!(open_store(&config).await.unwrap().name(), "sqlite");
    }
}
