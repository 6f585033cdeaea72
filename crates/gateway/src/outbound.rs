//! The send side of a chat transport.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;
use wardline_core::error::ChannelError;

/// Delivers a reply to a chat. Implemented by the platform adapter.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// Writes replies to the log instead of a chat.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutbound;

#[async_trait]
impl Outbound for LogOutbound {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        info!(chat_id, chars = text.chars().count(), "Reply sent");
        Ok(())
    }
}

/// Keeps every reply in memory, in send order.
#[derive(Debug, Default)]
pub struct CollectingOutbound {
    sent: Mutex<Vec<(String, String)>>,
}

impl CollectingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(chat_id, text)` pairs sent so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_text(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl Outbound for CollectingOutbound {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_in_order() {
        let out = CollectingOutbound::new();
        out.send("c1", "first").await.unwrap();
        out.send("c2", "second").await.unwrap();
        assert_eq!(
            out.sent(),
            vec![
                ("c1".to_string(), "first".to_string()),
                ("c2".to_string(), "second".to_string())
            ]
        );
        assert_eq!(out.last_text().as_deref(), Some("second"));
        assert!(LogOutbound.send("c1", "x").await.is_ok());
    }
}
