use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

/// Database used when `MONGO_DB` is unset.
pub const DEFAULT_DATABASE: &str = "quiz_room";
/// Name reported to the server in `currentOp` and logs.
const APP_NAME: &str = "quiz-room-back";

/// Parsed driver options plus the database holding rooms, decks and events.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
}

impl MongoConfig {
    /// Parse `uri` and tag the client with the service name.
    pub async fn from_uri(uri: &str, database_name: Option<&str>) -> MongoResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());

        Ok(Self {
            options,
            database_name: database_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
        })
    }

    /// Read `MONGO_URI` (required) and `MONGO_DB` (optional).
    pub async fn from_env() -> MongoResult<Self> {
        let Ok(uri) = std::env::var("MONGO_URI") else {
            return Err(MongoDaoError::MissingEnvVar { var: "MONGO_URI" });
        };
        let database_name = std::env::var("MONGO_DB").ok();
        Self::from_uri(&uri, database_name.as_deref()).await
    }
}
