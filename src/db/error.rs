use thiserror::Error;

/// Failures reported by the image record store.
///
/// None of these are fatal: the dispatcher treats every variant as
/// "skip this cycle and try again on the next tick".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("image store is unavailable")]
    Unavailable,
    #[error("image '{0}' already exists")]
    AlreadyExists(String),
    #[error("image '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Query(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
