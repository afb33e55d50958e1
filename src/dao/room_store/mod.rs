#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{DeckEntity, QuestionEntity, RoomEventEntity, RoomRecord};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for rooms, their audit log and the
/// question catalogue.
pub trait RoomStore: Send + Sync {
    fn load_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomRecord>>>;
    fn find_room_id_by_code(&self, code: String) -> BoxFuture<'static, StorageResult<Option<Uuid>>>;
    /// Fails with `StorageError::Duplicate` when the id or join code is taken.
    fn insert_room(&self, record: RoomRecord) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace the room iff the stored version still equals `expected_version`,
    /// else `StorageError::Conflict`.
    fn save_room(
        &self,
        record: RoomRecord,
        expected_version: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Delete rooms whose `expires_at` has passed, with their events. Returns how many.
    fn delete_expired_rooms(&self, now: i64) -> BoxFuture<'static, StorageResult<u64>>;
    fn append_events(&self, events: Vec<RoomEventEntity>) -> BoxFuture<'static, StorageResult<()>>;
    fn list_events(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoomEventEntity>>>;
    fn find_deck(&self, deck_id: String) -> BoxFuture<'static, StorageResult<Option<DeckEntity>>>;
    fn deck_question_ids(&self, deck_id: String) -> BoxFuture<'static, StorageResult<Vec<String>>>;
    fn find_question(
        &self,
        deck_id: String,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>>;
    /// Upsert a deck and its questions.
    fn seed_deck(
        &self,
        deck: DeckEntity,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
