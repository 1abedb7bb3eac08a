use std::collections::HashMap;
use std::sync::RwLock;

use super::KeyValueStore;
use super::error::{PoisonedSnafu, StorageResult};

/// Process-local store used when no directory is available, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| PoisonedSnafu { stage: "memory-get" }.build())?;
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PoisonedSnafu { stage: "memory-set" }.build())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PoisonedSnafu { stage: "memory-remove" }.build())?;
        entries.remove(key);
        Ok(())
    }
}
