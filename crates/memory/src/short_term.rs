//! Recent conversation history, oldest first, bounded by a capacity.

use std::sync::Arc;

use tracing::warn;
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};
use wardline_core::message::Message;

pub const SHORT_TERM_LIST: &str = "short_term";

pub struct ShortTermMemory {
    store: Arc<dyn MemoryStore>,
    namespace: Namespace,
    capacity: usize,
}

impl ShortTermMemory {
    pub fn new(store: Arc<dyn MemoryStore>, namespace: Namespace, capacity: usize) -> Self {
        Self {
            store,
            namespace,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append without trimming. Returns the new length.
    pub async fn push(&self, message: &Message) -> Result<usize, MemoryError> {
        let value = serde_json::to_value(message)
            .map_err(|e| MemoryError::Storage(format!("Message serialization: {e}")))?;
        self.store
            .append(&self.namespace, SHORT_TERM_LIST, value)
            .await
    }

    /// Evict the oldest entries beyond capacity. Returns how many went.
    pub async fn trim(&self) -> Result<usize, MemoryError> {
        self.store
            .trim_list(&self.namespace, SHORT_TERM_LIST, self.capacity)
            .await
    }

    /// Stored messages, oldest first. Undecodable entries are skipped.
    pub async fn history(&self) -> Result<Vec<Message>, MemoryError> {
        let raw = self.store.get_list(&self.namespace, SHORT_TERM_LIST).await?;
        Ok(decode_messages(&self.namespace, SHORT_TERM_LIST, raw))
    }

    pub async fn len(&self) -> Result<usize, MemoryError> {
        self.store
            .list_length(&self.namespace, SHORT_TERM_LIST)
            .await
    }

    pub async fn clear(&self) -> Result<(), MemoryError> {
        self.store
            .clear_list(&self.namespace, SHORT_TERM_LIST)
            .await
    }
}

pub(crate) fn decode_messages(
    namespace: &Namespace,
    list: &str,
    raw: Vec<serde_json::Value>,
) -> Vec<Message> {
    raw.into_iter()
        .filter_map(|v| match serde_json::from_value::<Message>(v) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(namespace = %namespace, list, error = %e, "Skipping corrupted message");
                None
            }
        })
        .collect()
}
