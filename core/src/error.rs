use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the indexing core.
///
/// Only store open/repair and write failures travel through here; per-word
/// problems and capacity limits are absorbed where they happen.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("index at {path} is corrupt and could not be repaired: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("index at {0} does not exist")]
    Missing(PathBuf),

    #[error("index at {0} is open read-only")]
    ReadOnly(PathBuf),

    #[error("index at {0} is closed")]
    Closed(PathBuf),

    #[error("no free merge index name next to {0}")]
    MergeSlotsExhausted(PathBuf),

    #[error("input is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("metadata encoding error: {0}")]
    Metadata(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// True when the store behind the error cannot serve reads or writes at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexError::Corrupt { .. } | IndexError::Missing(_))
    }
}
