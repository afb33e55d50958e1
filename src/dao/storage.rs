use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

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
    /// The stored version moved since the aggregate was loaded.
    #[error("room `{room_id}` was modified concurrently (expected version {expected})")]
    Conflict { room_id: Uuid, expected: i64 },
    /// A unique key (join code, room id) is already taken.
    #[error("duplicate {key} `{value}`")]
    Duplicate { key: &'static str, value: String },
    /// A persisted record could not be mapped back to the domain.
    #[error("corrupted record `{id}`: {message}")]
    Corrupted { id: String, message: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a corruption error for record `id`.
    pub fn corrupted(id: impl ToString, message: impl ToString) -> Self {
        StorageError::Corrupted {
            id: id.to_string(),
            message: message.to_string(),
        }
    }
}
