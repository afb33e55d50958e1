use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::connect_with_retry,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoRoomDocument, doc_id, versioned_doc_id},
};
use crate::dao::{
    models::{DeckEntity, QuestionEntity, RoomEventEntity, RoomRecord},
    room_store::RoomStore,
    storage::{StorageError, StorageResult},
};

const ROOM_COLLECTION_NAME: &str = "rooms";
const EVENT_COLLECTION_NAME: &str = "room_events";
const DECK_COLLECTION_NAME: &str = "decks";
const QUESTION_COLLECTION_NAME: &str = "questions";

#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_client, database) =
            connect_with_retry(&self.config.options, &self.config.database_name).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            connect_with_retry(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let indexes: [(&'static str, &'static str, Document, bool); 5] = [
            (ROOM_COLLECTION_NAME, "code", doc! {"code": 1}, true),
            (ROOM_COLLECTION_NAME, "expires_at", doc! {"expires_at": 1}, false),
            (EVENT_COLLECTION_NAME, "room_id,at", doc! {"room_id": 1, "at": 1}, false),
            (DECK_COLLECTION_NAME, "id", doc! {"id": 1}, true),
            (QUESTION_COLLECTION_NAME, "deck_id,id", doc! {"deck_id": 1, "id": 1}, true),
        ];

        let database = self.database().await;
        for (collection, index, keys, unique) in indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection}_{}_idx", index.replace(',', "_"))))
                        .unique(Some(unique))
                        .build(),
                )
                .build();

            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.database.read().await.clone()
    }

    async fn rooms(&self) -> Collection<MongoRoomDocument> {
        self.database().await.collection(ROOM_COLLECTION_NAME)
    }

    async fn events(&self) -> Collection<RoomEventEntity> {
        self.database().await.collection(EVENT_COLLECTION_NAME)
    }

    async fn decks(&self) -> Collection<DeckEntity> {
        self.database().await.collection(DECK_COLLECTION_NAME)
    }

    async fn questions(&self) -> Collection<QuestionEntity> {
        self.database().await.collection(QUESTION_COLLECTION_NAME)
    }

    async fn load_room(&self, id: Uuid) -> MongoResult<Option<RoomRecord>> {
        let document = self
            .rooms()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadRoom { id, source })?;
        Ok(document.map(|document| document.record))
    }

    async fn find_room_id_by_code(&self, code: String) -> MongoResult<Option<Uuid>> {
        let document = self
            .rooms()
            .await
            .find_one(doc! {"code": code.as_str()})
            .await
            .map_err(|source| MongoDaoError::LookupCode { code, source })?;
        Ok(document.map(|document| document.record.id()))
    }

    async fn insert_room(&self, record: RoomRecord) -> StorageResult<()> {
        let id = record.id();
        let code = record.room.code.clone();
        let document = MongoRoomDocument::from(record);

        match self.rooms().await.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StorageError::Duplicate {
                key: "join code",
                value: code,
            }),
            Err(source) => Err(MongoDaoError::SaveRoom { id, source }.into()),
        }
    }

    async fn save_room(&self, record: RoomRecord, expected_version: i64) -> StorageResult<()> {
        let id = record.id();
        let document = MongoRoomDocument::from(record);
        let result = self
            .rooms()
            .await
            .replace_one(versioned_doc_id(id, expected_version), &document)
            .await
            .map_err(|source| MongoDaoError::SaveRoom { id, source })?;

        if result.matched_count == 0 {
            return Err(StorageError::Conflict {
                room_id: id,
                expected: expected_version,
            });
        }
        Ok(())
    }

    async fn delete_expired_rooms(&self, now: i64) -> MongoResult<u64> {
        let expired = doc! {"expires_at": {"$lte": now}};
        let ids: Vec<String> = self
            .database()
            .await
            .collection::<Document>(ROOM_COLLECTION_NAME)
            .find(expired.clone())
            .projection(doc! {"_id": 1})
            .await
            .map_err(|source| MongoDaoError::DeleteExpired { source })?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|source| MongoDaoError::DeleteExpired { source })?
            .into_iter()
            .filter_map(|document| document.get_str("_id").ok().map(str::to_owned))
            .collect();

        if ids.is_empty() {
            return Ok(0);
        }

        let mut filter = expired;
        filter.insert("_id", doc! {"$in": ids.clone()});
        let deleted = self
            .rooms()
            .await
            .delete_many(filter)
            .await
            .map_err(|source| MongoDaoError::DeleteExpired { source })?;
        self.events()
            .await
            .delete_many(doc! {"room_id": {"$in": ids}})
            .await
            .map_err(|source| MongoDaoError::DeleteExpired { source })?;

        Ok(deleted.deleted_count)
    }

    async fn append_events(&self, events: Vec<RoomEventEntity>) -> MongoResult<()> {
        let Some(room_id) = events.first().map(|event| event.room_id) else {
            return Ok(());
        };
        self.events()
            .await
            .insert_many(&events)
            .await
            .map_err(|source| MongoDaoError::AppendEvents { room_id, source })?;
        Ok(())
    }

    async fn list_events(&self, room_id: Uuid) -> MongoResult<Vec<RoomEventEntity>> {
        self.events()
            .await
            .find(doc! {"room_id": room_id.to_string()})
            .sort(doc! {"at": 1})
            .await
            .map_err(|source| MongoDaoError::ListEvents { room_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListEvents { room_id, source })
    }

    async fn find_deck(&self, deck_id: String) -> MongoResult<Option<DeckEntity>> {
        self.decks()
            .await
            .find_one(doc! {"id": deck_id.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadDeck { deck_id, source })
    }

    async fn deck_questions(&self, deck_id: String) -> MongoResult<Vec<QuestionEntity>> {
        self.questions()
            .await
            .find(doc! {"deck_id": deck_id.as_str()})
            .sort(doc! {"_id": 1})
            .await
            .map_err(|source| MongoDaoError::LoadDeck {
                deck_id: deck_id.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadDeck { deck_id, source })
    }

    async fn find_question(
        &self,
        deck_id: String,
        question_id: String,
    ) -> MongoResult<Option<QuestionEntity>> {
        self.questions()
            .await
            .find_one(doc! {"deck_id": deck_id.as_str(), "id": question_id.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadDeck { deck_id, source })
    }

    async fn seed_deck(&self, deck: DeckEntity, questions: Vec<QuestionEntity>) -> MongoResult<()> {
        let deck_id = deck.id.clone();
        self.decks()
            .await
            .replace_one(doc! {"id": deck_id.as_str()}, &deck)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveDeck {
                deck_id: deck_id.clone(),
                source,
            })?;

        let collection = self.questions().await;
        for question in &questions {
            collection
                .replace_one(doc! {"deck_id": deck_id.as_str(), "id": question.id.as_str()}, question)
                .upsert(true)
                .await
                .map_err(|source| MongoDaoError::SaveDeck {
                    deck_id: deck_id.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl RoomStore for MongoRoomStore {
    fn load_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomRecord>>> {
        let store = self.clone();
        Box::pin(async move { store.load_room(id).await.map_err(Into::into) })
    }

    fn find_room_id_by_code(&self, code: String) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let store = self.clone();
        Box::pin(async move { store.find_room_id_by_code(code).await.map_err(Into::into) })
    }

    fn insert_room(&self, record: RoomRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_room(record).await })
    }

    fn save_room(
        &self,
        record: RoomRecord,
        expected_version: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_room(record, expected_version).await })
    }

    fn delete_expired_rooms(&self, now: i64) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.delete_expired_rooms(now).await.map_err(Into::into) })
    }

    fn append_events(&self, events: Vec<RoomEventEntity>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append_events(events).await.map_err(Into::into) })
    }

    fn list_events(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoomEventEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_events(room_id).await.map_err(Into::into) })
    }

    fn find_deck(&self, deck_id: String) -> BoxFuture<'static, StorageResult<Option<DeckEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_deck(deck_id).await.map_err(Into::into) })
    }

    fn deck_question_ids(&self, deck_id: String) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        Box::pin(async move {
            let questions = store.deck_questions(deck_id).await?;
            Ok(questions.into_iter().map(|question| question.id).collect())
        })
    }

    fn find_question(
        &self,
        deck_id: String,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_question(deck_id, question_id)
                .await
                .map_err(Into::into)
        })
    }

    fn seed_deck(
        &self,
        deck: DeckEntity,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.seed_deck(deck, questions).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
