use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("storage key '{key}' is invalid: {details}"))]
    InvalidKey {
        stage: &'static str,
        key: String,
        details: &'static str,
    },
    #[snafu(display("failed to create storage directory at {path:?}"))]
    CreateDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read storage entry at {path:?}"))]
    ReadEntry {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write storage entry at {path:?}"))]
    WriteEntry {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace storage entry from {from:?} to {to:?}"))]
    ReplaceEntry {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to remove storage entry at {path:?}"))]
    RemoveEntry {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to encode value for key '{key}' on `{stage}`: {source}"))]
    EncodeJson {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("stored value for key '{key}' is not valid JSON on `{stage}`: {source}"))]
    DecodeJson {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("in-memory store lock was poisoned"))]
    Poisoned { stage: &'static str },
}

pub type StorageResult<T> = Result<T, StorageError>;
