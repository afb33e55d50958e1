use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::{DeckEntity, QuestionEntity, RoomEventEntity, RoomRecord};

pub const ROOM_PREFIX: &str = "room::";
pub const CODE_PREFIX: &str = "code::";
pub const EVENT_PREFIX: &str = "event::";
pub const DECK_PREFIX: &str = "deck::";
pub const QUESTION_PREFIX: &str = "question::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Any document: only the revision is read back.
#[derive(Debug, Clone, Deserialize)]
pub struct RevisionOnly {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRoomDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub record: RoomRecord,
}

impl CouchRoomDocument {
    pub fn new(record: RoomRecord, rev: Option<String>) -> Self {
        Self {
            id: room_doc_id(record.id()),
            rev,
            record,
        }
    }
}

/// Join code reservation; creating it fails with `409` when the code is taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchCodeDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchEventDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub event: RoomEventEntity,
}

impl From<RoomEventEntity> for CouchEventDocument {
    fn from(event: RoomEventEntity) -> Self {
        Self {
            id: event_doc_id(&event),
            rev: None,
            event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDeckDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub deck: DeckEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchQuestionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub question: QuestionEntity,
}

pub fn room_doc_id(id: Uuid) -> String {
    format!("{ROOM_PREFIX}{id}")
}

pub fn code_doc_id(code: &str) -> String {
    format!("{CODE_PREFIX}{code}")
}

/// Prefix shared by every event of a room.
pub fn room_events_prefix(room_id: Uuid) -> String {
    format!("{EVENT_PREFIX}{room_id}::")
}

/// Zero-padded timestamp keeps `_all_docs` order chronological.
pub fn event_doc_id(event: &RoomEventEntity) -> String {
    format!(
        "{}{:015}::{}",
        room_events_prefix(event.room_id),
        event.at.max(0),
        event.id
    )
}

pub fn deck_doc_id(deck_id: &str) -> String {
    format!("{DECK_PREFIX}{deck_id}")
}

pub fn deck_questions_prefix(deck_id: &str) -> String {
    format!("{QUESTION_PREFIX}{deck_id}::")
}

pub fn question_doc_id(deck_id: &str, question_id: &str) -> String {
    format!("{}{question_id}", deck_questions_prefix(deck_id))
}
