use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save room `{id}`")]
    SaveRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room `{id}`")]
    LoadRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to look up join code `{code}`")]
    LookupCode {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete expired rooms")]
    DeleteExpired {
        #[source]
        source: MongoError,
    },
    #[error("failed to write events for room `{room_id}`")]
    AppendEvents {
        room_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list events for room `{room_id}`")]
    ListEvents {
        room_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load deck `{deck_id}`")]
    LoadDeck {
        deck_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save deck `{deck_id}`")]
    SaveDeck {
        deck_id: String,
        #[source]
        source: MongoError,
    },
}

/// Whether the driver reported a unique index violation (E11000).
pub fn is_duplicate_key(err: &MongoError) -> bool {
    const DUPLICATE_KEY: i32 = 11_000;
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        _ => false,
    }
}
