//! Inbound message store (received SMS).

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One received message as delivered by the SMS gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: i64,
    pub sender: String,
    /// Gateway payload, kept verbatim.
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Message body, read from `message` or else `text`.
    pub fn text(&self) -> Option<&str> {
        ["message", "text"]
            .iter()
            .find_map(|key| self.raw.get(key).and_then(|v| v.as_str()))
    }
}

/// Append-only store of inbound messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, sender: &str, raw: serde_json::Value) -> Result<InboundMessage, MessageStoreError>;

    /// Messages whose sender contains `sender`, created at or after `since`,
    /// newest first.
    async fn find_since(&self, sender: &str, since: DateTime<Utc>) -> Result<Vec<InboundMessage>, MessageStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory message store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<InboundMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append with an explicit receive time.
    pub fn insert_at(
        &self,
        sender: &str,
        raw: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Result<InboundMessage, MessageStoreError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| MessageStoreError::Storage("lock poisoned".to_string()))?;
        let message = InboundMessage {
            id: messages.len() as i64 + 1,
            sender: sender.to_string(),
            raw,
            created_at,
        };
        messages.push(message.clone());
        Ok(message)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, sender: &str, raw: serde_json::Value) -> Result<InboundMessage, MessageStoreError> {
        self.insert_at(sender, raw, Utc::now())
    }

    async fn find_since(&self, sender: &str, since: DateTime<Utc>) -> Result<Vec<InboundMessage>, MessageStoreError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| MessageStoreError::Storage("lock poisoned".to_string()))?;
        let mut found: Vec<_> = messages
            .iter()
            .filter(|m| m.created_at >= since && m.sender.contains(sender))
            .cloned()
            .collect();
        found.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_prefers_message_then_text() {
        let mut m = InboundMessage {
            id: 1,
            sender: "+10000".into(),
            raw: json!({ "message": "a", "text": "b" }),
            created_at: Utc::now(),
        };
        assert_eq!(m.text(), Some("a"));
        m.raw = json!({ "text": "b" });
        assert_eq!(m.text(), Some("b"));
        m.raw = json!({ "body": "c" });
        assert_eq!(m.text(), None);
    }

    #[tokio::test]
    async fn find_since_filters_by_window_and_sender_newest_first() {
        let store = InMemoryMessageStore::new();
        let since = Utc::now();
        store
            .insert_at("+911234", json!({ "message": "old" }), since - chrono::Duration::seconds(1))
            .unwrap();
        store.insert_at("+911234", json!({ "message": "first" }), since).unwrap();
        store.insert_at("+99", json!({ "message": "other sender" }), since).unwrap();
        store
            .insert_at("+911234", json!({ "message": "second" }), since + chrono::Duration::seconds(2))
            .unwrap();

        let found = store.find_since("1234", since).await.unwrap();
        let texts: Vec<_> = found.iter().filter_map(|m| m.text()).collect();
        assert_eq!(texts, vec!["second", "first"]);
    }
}
