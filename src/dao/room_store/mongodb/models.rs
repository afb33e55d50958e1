use mongodb::bson::{Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::RoomRecord;

/// Room aggregate stored as one document; `code`, `version` and `expires_at`
/// are lifted to the top level so they can be indexed and filtered on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub code: String,
    pub version: i64,
    pub expires_at: i64,
    pub record: RoomRecord,
}

impl From<RoomRecord> for MongoRoomDocument {
    fn from(record: RoomRecord) -> Self {
        Self {
            id: record.id().to_string(),
            code: record.room.code.clone(),
            version: record.room.version,
            expires_at: record.room.expires_at,
            record,
        }
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn versioned_doc_id(id: Uuid, version: i64) -> Document {
    doc! {"_id": id.to_string(), "version": version}
}
