// src/storage/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Identity already exists: {0}")]
    DuplicateIdentity(String),

    #[error("Identity not found: {0}")]
    NotFound(String),

    #[error("Template {0} is empty")]
    EmptyTemplate(u32),

    #[error("No templates supplied for {0}")]
    NoTemplates(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupted record: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for StorageError {
    fn from(error: rocksdb::Error) -> Self {
        StorageError::Database(error.into_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
