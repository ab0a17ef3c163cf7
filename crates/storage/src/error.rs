use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid tuple: {0}")]
    InvalidTuple(String),

    #[error("Storage error: {0}")]
    Internal(String),
}
