use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// An update targeted a document that does not exist.
    #[error("document `{path}` does not exist")]
    MissingDocument { path: String },
    /// An update precondition did not hold; nothing was written.
    #[error("precondition failed on `{path}`: {reason}")]
    PreconditionFailed { path: String, reason: String },
    /// A stored document could not be mapped to or from its model.
    #[error("malformed document `{path}`")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
