//! Error types for the reference index

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),
}

impl IndexError {
    /// True when the underlying bytes cannot be trusted anymore, as opposed
    /// to a transient failure like a full disk.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            IndexError::Corrupted(_)
                | IndexError::InvalidFormat(_)
                | IndexError::Storage(sled::Error::Corruption { .. })
        )
    }
}
