use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckError>;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Resolution depth exceeded")]
    ResolutionDepthExceeded,

    #[error("Check cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] rebac_models::ModelError),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rebac_storage::StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckError {
    /// Errors a combinator may absorb while waiting for a sibling to
    /// produce the decisive answer: a cancelled sibling, or a branch that
    /// ran into the depth bound.
    pub(crate) fn is_absorbable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ResolutionDepthExceeded)
    }
}
