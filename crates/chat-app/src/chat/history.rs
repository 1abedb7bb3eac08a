use std::sync::Arc;

use trilha_storage::{KeyValueStore, StorageError, load_json, save_json};

use super::message::{Message, MessageStore};

/// Storage key of the persisted chat history.
pub const CHAT_HISTORY_KEY: &str = "trilha.chat-history";

/// Best-effort persistence of chat-mode messages. Failures are logged and
/// never reach the caller.
#[derive(Clone)]
pub struct ChatHistory {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, CHAT_HISTORY_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Loads the saved history; corrupt data is dropped and reads as empty.
    pub fn load(&self) -> MessageStore {
        match load_json::<Vec<Message>>(self.store.as_ref(), &self.key) {
            Ok(Some(messages)) => {
                tracing::debug!(key = %self.key, count = messages.len(), "restored chat history");
                MessageStore::restore(messages)
            }
            Ok(None) => MessageStore::new(),
            Err(error @ StorageError::DecodeJson { .. }) => {
                tracing::warn!(key = %self.key, error = %error, "discarding corrupt chat history");
                if let Err(error) = self.store.remove_item(&self.key) {
                    tracing::warn!(key = %self.key, error = %error, "failed to remove corrupt chat history");
                }
                MessageStore::new()
            }
            Err(error) => {
                tracing::warn!(key = %self.key, error = %error, "failed to read chat history");
                MessageStore::new()
            }
        }
    }

    pub fn save(&self, messages: &MessageStore) {
        if let Err(error) = save_json(self.store.as_ref(), &self.key, messages.messages()) {
            tracing::warn!(key = %self.key, error = %error, "failed to persist chat history");
        }
    }

    pub fn clear(&self) {
        if let Err(error) = self.store.remove_item(&self.key) {
            tracing::warn!(key = %self.key, error = %error, "failed to remove chat history");
        }
    }
}
