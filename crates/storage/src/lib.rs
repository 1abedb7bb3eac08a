pub mod error;
pub mod file;
pub mod ids;
pub mod memory;

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use ids::MessageId;
pub use memory::MemoryStore;

use error::{DecodeJsonSnafu, EncodeJsonSnafu};

/// String key/value store with local-storage semantics: one value per key,
/// whole-value replacement, missing keys read as `None`.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove_item(&self, key: &str) -> StorageResult<()>;
}

/// Reads and decodes a JSON value. A present but undecodable value is an error,
/// so callers can decide whether to discard it.
pub fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    let Some(raw) = store.get_item(key)? else {
        return Ok(None);
    };

    let value = serde_json::from_str(&raw).context(DecodeJsonSnafu {
        stage: "load-json-decode",
        key: key.to_string(),
    })?;
    Ok(Some(value))
}

pub fn save_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> StorageResult<()>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value).context(EncodeJsonSnafu {
        stage: "save-json-encode",
        key: key.to_string(),
    })?;
    store.set_item(key, &raw)
}
