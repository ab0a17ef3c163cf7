use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Type not found: {0}")]
    TypeNotFound(String),

    #[error("Relation not found: {0}")]
    RelationNotFound(String),

    #[error("Invalid tuple key: {0}")]
    InvalidTupleKey(String),
}
