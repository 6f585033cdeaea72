//! Conversation buffer: turns not yet passed through extraction.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use wardline_core::error::MemoryError;
use wardline_core::memory::{MemoryStore, Namespace};
use wardline_core::message::Message;

use crate::short_term::decode_messages;

pub const BUFFER_LIST: &str = "buffer";
pub const BUFFER_META_KEY: &str = "buffer_meta";

/// Decides when buffered turns are due for extraction.
///
/// Extraction is due when the buffer holds at least `trigger_count`
/// messages, or when it is non-empty and `trigger_interval` has passed
/// since the last extraction (or none has ever run).
pub struct ConversationBuffer {
    store: Arc<dyn MemoryStore>,
    namespace: Namespace,
    trigger_count: usize,
    trigger_interval: Duration,
}

impl ConversationBuffer {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        namespace: Namespace,
        trigger_count: usize,
        trigger_interval: Duration,
    ) -> Self {
        Self {
            store,
            namespace,
            trigger_count,
            trigger_interval,
        }
    }

    pub async fn add(&self, message: &Message) -> Result<usize, MemoryError> {
        let value = serde_json::to_value(message)
            .map_err(|e| MemoryError::Storage(format!("Message serialization: {e}")))?;
        self.store.append(&self.namespace, BUFFER_LIST, value).await
    }

    pub async fn should_extract(&self) -> Result<bool, MemoryError> {
        let len = self.count().await?;
        if len == 0 {
            return Ok(false);
        }
        if len >= self.trigger_count {
            return Ok(true);
        }
        let last = self
            .store
            .get(&self.namespace, BUFFER_META_KEY)
            .await?
            .and_then(|meta| meta.get("last_extraction_ms").and_then(Value::as_i64));
        let Some(last_ms) = last else {
            return Ok(true);
        };
        let elapsed_ms = Utc::now().timestamp_millis().saturating_sub(last_ms);
        let interval_ms = i64::try_from(self.trigger_interval.as_millis()).unwrap_or(i64::MAX);
        Ok(elapsed_ms >= interval_ms)
    }

    /// Buffered messages, oldest first, left in place.
    pub async fn pending(&self) -> Result<Vec<Message>, MemoryError> {
        let raw = self.store.get_list(&self.namespace, BUFFER_LIST).await?;
        Ok(decode_messages(&self.namespace, BUFFER_LIST, raw))
    }

    /// Clear the buffer and record the extraction time.
    pub async fn mark_extracted(&self) -> Result<(), MemoryError> {
        self.store.clear_list(&self.namespace, BUFFER_LIST).await?;
        let now = Utc::now();
        self.store
            .set(
                &self.namespace,
                BUFFER_META_KEY,
                json!({
                    "last_extraction_ms": now.timestamp_millis(),
                    "last_extraction_at": now.to_rfc3339(),
                }),
            )
            .await
    }

    pub async fn count(&self) -> Result<usize, MemoryError> {
        self.store.list_length(&self.namespace, BUFFER_LIST).await
    }

    /// Drop buffered messages and extraction bookkeeping.
    pub async fn clear(&self) -> Result<(), MemoryError> {
        self.store.clear_list(&self.namespace, BUFFER_LIST).await?;
        self.store.delete(&self.namespace, BUFFER_META_KEY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    fn buffer(count: usize, interval: Duration) -> ConversationBuffer {
        ConversationBuffer::new(
            Arc::new(InMemoryStore::new()),
            Namespace::from("bot:u1"),
            count,
            interval,
        )
    }

    #[tokio::test]
    async fn empty_buffer_never_triggers() {
        let buf = buffer(1, Duration::ZERO);
        assert!(!buf.should_extract().await.unwrap());
    }

    #[tokio::test]
    async fn first_extraction_is_due_once_anything_is_buffered() {
        let buf = buffer(10, Duration::from_secs(3600));
        buf.add(&Message::user("hi")).await.unwrap();
        assert!(buf.should_extract().await.unwrap());
    }

    #[tokio::test]
    async fn interval_gates_after_an_extraction() {
        let buf = buffer(3, Duration::from_secs(3600));
        buf.add(&Message::user("one")).await.unwrap();
        buf.mark_extracted().await.unwrap();
        assert_eq!(buf.count().await.unwrap(), 0);

        buf.add(&Message::user("two")).await.unwrap();
        assert!(!buf.should_extract().await.unwrap());
        buf.add(&Message::assistant("three")).await.unwrap();
        buf.add(&Message::user("four")).await.unwrap();
        assert!(buf.should_extract().await.unwrap());
    }

    #[tokio::test]
    async fn elapsed_interval_triggers() {
        let buf = buffer(100, Duration::ZERO);
        buf.add(&Message::user("one")).await.unwrap();
        buf.mark_extracted().await.unwrap();
        buf.add(&Message::user("two")).await.unwrap();
        assert!(buf.should_extract().await.unwrap());
    }

    #[tokio::test]
    async fn pending_leaves_messages_in_place() {
        let buf = buffer(5, Duration::ZERO);
        buf.add(&Message::user("keep me")).await.unwrap();
        assert_eq!(buf.pending().await.unwrap()[0].content, "keep me");
        assert_eq!(buf.count().await.unwrap(), 1);
        buf.clear().await.unwrap();
        assert_eq!(buf.count().await.unwrap(), 0);
    }
}
