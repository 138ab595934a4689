use thiserror::Error;

use crate::services::CodecError;

/// Failures of the key-value storage medium.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Failures of conversation persistence as seen by callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Chat history exceeds the storage quota even after removing older chats")]
    QuotaExceeded,

    #[error("Invalid chat history format: {message}")]
    ImportFormat { message: String },

    #[error("No stored chat with id {id}")]
    NotFound { id: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(error))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
