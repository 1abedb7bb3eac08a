use std::path::{Path, PathBuf};

use snafu::{ResultExt, ensure};

use super::KeyValueStore;
use super::error::{
    CreateDirectorySnafu, InvalidKeySnafu, ReadEntrySnafu, RemoveEntrySnafu, ReplaceEntrySnafu,
    StorageResult, WriteEntrySnafu,
};

const ENTRY_EXTENSION: &str = "json";

/// Directory-backed store: each key is one file, written through a temp file
/// and renamed into place so readers never observe a partial value.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).context(CreateDirectorySnafu {
            stage: "file-store-open",
            path: root.clone(),
        })?;

        tracing::debug!(root = ?root, "opened file store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> StorageResult<PathBuf> {
        ensure!(
            !key.is_empty(),
            InvalidKeySnafu {
                stage: "file-store-entry-path",
                key,
                details: "key is empty",
            }
        );
        // Keys become file names, so anything that could escape the root is rejected.
        ensure!(
            key.chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'))
                && !key.starts_with('.'),
            InvalidKeySnafu {
                stage: "file-store-entry-path",
                key,
                details: "key may only contain ASCII letters, digits, '.', '-' and '_'",
            }
        );

        Ok(self.root.join(format!("{key}.{ENTRY_EXTENSION}")))
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.entry_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(source).context(ReadEntrySnafu {
                stage: "file-store-get",
                path,
            }),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.entry_path(key)?;
        let temp_path = path.with_extension("json.tmp");

        std::fs::write(&temp_path, value).context(WriteEntrySnafu {
            stage: "file-store-write-temporary",
            path: temp_path.clone(),
        })?;
        std::fs::rename(&temp_path, &path).context(ReplaceEntrySnafu {
            stage: "file-store-rename-temporary",
            from: temp_path,
            to: path,
        })?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        let path = self.entry_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(source).context(RemoveEntrySnafu {
                stage: "file-store-remove",
                path,
            }),
        }
    }
}
