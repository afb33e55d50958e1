//! Process-local store used for single-node deployments and tests.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, ready};
use uuid::Uuid;

use crate::dao::{
    models::{DeckEntity, QuestionEntity, RoomEventEntity, RoomRecord},
    room_store::RoomStore,
    storage::{StorageError, StorageResult},
};

#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rooms: DashMap<Uuid, RoomRecord>,
    codes: DashMap<String, Uuid>,
    events: DashMap<Uuid, Vec<RoomEventEntity>>,
    decks: DashMap<String, DeckEntity>,
    questions: DashMap<String, Vec<QuestionEntity>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_record(&self, record: RoomRecord) -> StorageResult<()> {
        let id = record.id();
        if self.inner.rooms.contains_key(&id) {
            return Err(StorageError::Duplicate {
                key: "room id",
                value: id.to_string(),
            });
        }
        match self.inner.codes.entry(record.room.code.clone()) {
            Entry::Occupied(entry) => Err(StorageError::Duplicate {
                key: "join code",
                value: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(id);
                self.inner.rooms.insert(id, record);
                Ok(())
            }
        }
    }

    fn replace_record(&self, record: RoomRecord, expected_version: i64) -> StorageResult<()> {
        let id = record.id();
        let Some(mut stored) = self.inner.rooms.get_mut(&id) else {
            return Err(StorageError::Conflict {
                room_id: id,
                expected: expected_version,
            });
        };
        if stored.room.version != expected_version {
            return Err(StorageError::Conflict {
                room_id: id,
                expected: expected_version,
            });
        }
        *stored = record;
        Ok(())
    }

    fn purge_expired(&self, now: i64) -> u64 {
        let expired: Vec<(Uuid, String)> = self
            .inner
            .rooms
            .iter()
            .filter(|entry| entry.room.expires_at <= now)
            .map(|entry| (*entry.key(), entry.room.code.clone()))
            .collect();

        let mut deleted = 0;
        for (id, code) in expired {
            if self
                .inner
                .rooms
                .remove_if(&id, |_, record| record.room.expires_at <= now)
                .is_some()
            {
                self.inner.codes.remove_if(&code, |_, owner| *owner == id);
                self.inner.events.remove(&id);
                deleted += 1;
            }
        }
        deleted
    }

    #[cfg(test)]
    pub(crate) fn get_record(&self, id: Uuid) -> Option<RoomRecord> {
        self.inner.rooms.get(&id).map(|entry| entry.value().clone())
    }

    /// Write a record without any version check.
    #[cfg(test)]
    pub(crate) fn overwrite_record(&self, record: RoomRecord) {
        self.inner.rooms.insert(record.id(), record);
    }

    fn store_deck(&self, deck: DeckEntity, questions: Vec<QuestionEntity>) {
        self.inner.questions.insert(deck.id.clone(), questions);
        self.inner.decks.insert(deck.id.clone(), deck);
    }
}

impl RoomStore for MemoryRoomStore {
    fn load_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomRecord>>> {
        let record = self.inner.rooms.get(&id).map(|entry| entry.value().clone());
        Box::pin(ready(Ok(record)))
    }

    fn find_room_id_by_code(&self, code: String) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let id = self.inner.codes.get(&code).map(|entry| *entry.value());
        Box::pin(ready(Ok(id)))
    }

    fn insert_room(&self, record: RoomRecord) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.insert_record(record)))
    }

    fn save_room(
        &self,
        record: RoomRecord,
        expected_version: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.replace_record(record, expected_version)))
    }

    fn delete_expired_rooms(&self, now: i64) -> BoxFuture<'static, StorageResult<u64>> {
        Box::pin(ready(Ok(self.purge_expired(now))))
    }

    fn append_events(&self, events: Vec<RoomEventEntity>) -> BoxFuture<'static, StorageResult<()>> {
        for event in events {
            self.inner
                .events
                .entry(event.room_id)
                .or_default()
                .push(event);
        }
        Box::pin(ready(Ok(())))
    }

    fn list_events(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoomEventEntity>>> {
        let events = self
            .inner
            .events
            .get(&room_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Box::pin(ready(Ok(events)))
    }

    fn find_deck(&self, deck_id: String) -> BoxFuture<'static, StorageResult<Option<DeckEntity>>> {
        let deck = self.inner.decks.get(&deck_id).map(|entry| entry.value().clone());
        Box::pin(ready(Ok(deck)))
    }

    fn deck_question_ids(&self, deck_id: String) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let ids = self
            .inner
            .questions
            .get(&deck_id)
            .map(|entry| entry.iter().map(|question| question.id.clone()).collect())
            .unwrap_or_default();
        Box::pin(ready(Ok(ids)))
    }

    fn find_question(
        &self,
        deck_id: String,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let question = self.inner.questions.get(&deck_id).and_then(|entry| {
            entry
                .iter()
                .find(|question| question.id == question_id)
                .cloned()
        });
        Box::pin(ready(Ok(question)))
    }

    fn seed_deck(
        &self,
        deck: DeckEntity,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.store_deck(deck, questions);
        Box::pin(ready(Ok(())))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(Ok(())))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::fixtures::*;

    fn record() -> RoomRecord {
        aggregate(guest("h"), &[]).into()
    }

    #[tokio::test]
    async fn save_requires_matching_version() {
        let store = MemoryRoomStore::new();
        let mut record = record();
        let id = record.id();
        store.insert_room(record.clone()).await.unwrap();

        record.room.version = 2;
        store.save_room(record.clone(), 1).await.unwrap();

        record.room.version = 3;
        match store.save_room(record, 1).await {
            Err(StorageError::Conflict { room_id, expected }) => {
                assert_eq!(room_id, id);
                assert_eq!(expected, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let stored = store.load_room(id).await.unwrap().unwrap();
        assert_eq!(stored.room.version, 2);
    }

    #[tokio::test]
    async fn join_codes_are_unique() {
        let store = MemoryRoomStore::new();
        let first = record();
        let mut second = record();
        second.room.code = first.room.code.clone();

        store.insert_room(first.clone()).await.unwrap();
        assert!(matches!(
            store.insert_room(second).await,
            Err(StorageError::Duplicate { key: "join code", .. })
        ));
        assert_eq!(
            store.find_room_id_by_code(first.room.code.clone()).await.unwrap(),
            Some(first.id())
        );
    }

    #[tokio::test]
    async fn expired_rooms_are_deleted_with_their_code() {
        let store = MemoryRoomStore::new();
        let record = record();
        let id = record.id();
        let code = record.room.code.clone();
        let expires_at = record.room.expires_at;
        store.insert_room(record).await.unwrap();

        assert_eq!(store.delete_expired_rooms(expires_at - 1).await.unwrap(), 0);
        assert_eq!(store.delete_expired_rooms(expires_at).await.unwrap(), 1);
        assert!(store.load_room(id).await.unwrap().is_none());
        assert!(store.find_room_id_by_code(code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn catalogue_lookups() {
        let store = MemoryRoomStore::new();
        let deck = DeckEntity {
            id: "capitals".into(),
            title: "Capitals".into(),
            description: None,
        };
        let question = QuestionEntity {
            id: "fr".into(),
            deck_id: "capitals".into(),
            prompt: "Capital of France?".into(),
            choices: vec!["Lyon".into(), "Paris".into()],
            correct_index: 1,
        };
        store
            .seed_deck(deck.clone(), vec![question.clone()])
            .await
            .unwrap();

        assert_eq!(store.find_deck("capitals".into()).await.unwrap(), Some(deck));
        assert_eq!(
            store.deck_question_ids("capitals".into()).await.unwrap(),
            vec!["fr".to_owned()]
        );
        assert_eq!(
            store
                .find_question("capitals".into(), "fr".into())
                .await
                .unwrap(),
            Some(question)
        );
        assert!(store.deck_question_ids("missing".into()).await.unwrap().is_empty());
    }
}
