//! Repository error model.

use thiserror::Error;

use slotkeeper_core::DomainError;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Error returned by repository and store operations.
///
/// Domain failures (duplicate code, missing records, capacity) pass through
/// unchanged in `Domain`. The remaining variants are infrastructure failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A lock conflict, serialization failure or deadlock. Retried by the
    /// repositories until their policy is exhausted.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn concurrent(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }

    /// The wrapped domain error, if any.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }
}
