//! Error types for the object pool

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error type produced by object factories and destroy hooks
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a hook error, kept `Clone` so `PoolError` stays `Clone`
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Object pool exhausted - nothing became available within {0:?}")]
    Exhausted(Duration),

    #[error("Failed to create pooled object: {0}")]
    Creation(#[source] SharedError),

    #[error("Destroy hook failed: {0}")]
    Destruction(#[source] SharedError),

    #[error("Pool `{0}` already exists")]
    DuplicatePool(String),

    #[error("Pool `{0}` is not registered")]
    UnknownPool(String),

    #[error("Pool `{0}` holds a different object type")]
    PoolTypeMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No tokio runtime available to drive the recycler")]
    RuntimeUnavailable,
}

impl PoolError {
    pub(crate) fn creation(err: BoxError) -> Self {
        Self::Creation(Arc::from(err))
    }

    pub(crate) fn destruction(err: BoxError) -> Self {
        Self::Destruction(Arc::from(err))
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_creation_error_keeps_source() {
        let err = PoolError::creation("connection refused".into());

        assert_eq!(err.to_string(), "Failed to create pooled object: connection refused");
        assert_eq!(err.source().unwrap().to_string(), "connection refused");
    }

    #[test]
    fn test_exhausted_message_names_timeout() {
        let err = PoolError::Exhausted(Duration::from_millis(1500));
        assert!(err.to_string().contains("1.5s"));
    }
}
