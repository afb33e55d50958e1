use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use uuid::Uuid;

use crate::dao::{
    models::{DeckEntity, QuestionEntity, RoomEventEntity, RoomRecord},
    room_store::RoomStore,
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchCodeDocument, CouchDeckDocument, CouchEventDocument,
        CouchQuestionDocument, CouchRoomDocument, END_SUFFIX, ROOM_PREFIX, RevisionOnly,
        code_doc_id, deck_doc_id, deck_questions_prefix, question_doc_id, room_doc_id,
        room_events_prefix,
    },
};

#[derive(Clone)]
pub struct CouchRoomStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchRoomStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorized(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorized(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT a document. A `409` (stale or missing `_rev`) maps to `DocumentConflict`.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::DocumentConflict {
                path: doc_id.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<()> {
        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::DocumentConflict {
                path: doc_id.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn upsert_document<T>(&self, doc_id: &str, mut document: T) -> CouchResult<()>
    where
        T: Serialize + WithRevision,
    {
        if let Some(existing) = self.get_document::<RevisionOnly>(doc_id).await? {
            document.set_rev(existing.rev);
        }
        self.put_document(doc_id, &document).await
    }

    async fn insert_room(&self, record: RoomRecord) -> StorageResult<()> {
        let room_id = record.id();
        let code = record.room.code.clone();
        let code_id = code_doc_id(&code);
        let reservation = CouchCodeDocument {
            id: code_id.clone(),
            rev: None,
            room_id: room_id.to_string(),
        };

        match self.put_document(&code_id, &reservation).await {
            Err(CouchDaoError::DocumentConflict { .. }) => {
                return Err(StorageError::Duplicate {
                    key: "join code",
                    value: code,
                });
            }
            other => other?,
        }

        let doc_id = room_doc_id(room_id);
        match self
            .put_document(&doc_id, &CouchRoomDocument::new(record, None))
            .await
        {
            Err(CouchDaoError::DocumentConflict { .. }) => Err(StorageError::Duplicate {
                key: "room id",
                value: room_id.to_string(),
            }),
            other => other.map_err(Into::into),
        }
    }

    async fn save_room(&self, record: RoomRecord, expected_version: i64) -> StorageResult<()> {
        let room_id = record.id();
        let doc_id = room_doc_id(room_id);
        let conflict = StorageError::Conflict {
            room_id,
            expected: expected_version,
        };

        let Some(existing) = self.get_document::<CouchRoomDocument>(&doc_id).await? else {
            return Err(conflict);
        };
        if existing.record.room.version != expected_version {
            return Err(conflict);
        }

        match self
            .put_document(&doc_id, &CouchRoomDocument::new(record, existing.rev))
            .await
        {
            Err(CouchDaoError::DocumentConflict { .. }) => Err(conflict),
            other => other.map_err(Into::into),
        }
    }

    async fn delete_expired_rooms(&self, now: i64) -> CouchResult<u64> {
        let rooms = self
            .list_documents::<CouchRoomDocument>(ROOM_PREFIX)
            .await?;

        let mut deleted = 0;
        for document in rooms
            .into_iter()
            .filter(|document| document.record.room.expires_at <= now)
        {
            let Some(rev) = document.rev.as_deref() else {
                continue;
            };
            match self.delete_document(&document.id, rev).await {
                // Touched since listing; it is no longer expired.
                Err(CouchDaoError::DocumentConflict { .. }) => continue,
                other => other?,
            }
            deleted += 1;

            let code_id = code_doc_id(&document.record.room.code);
            if let Some(code) = self.get_document::<RevisionOnly>(&code_id).await? {
                self.delete_document(&code.id, &code.rev).await?;
            }
            let events = self
                .list_documents::<RevisionOnly>(&room_events_prefix(document.record.id()))
                .await?;
            for event in events {
                self.delete_document(&event.id, &event.rev).await?;
            }
        }

        Ok(deleted)
    }

    async fn find_room_id_by_code(&self, code: &str) -> CouchResult<Option<Uuid>> {
        let doc_id = code_doc_id(code);
        let Some(reservation) = self.get_document::<CouchCodeDocument>(&doc_id).await? else {
            return Ok(None);
        };
        Uuid::parse_str(&reservation.room_id)
            .map(Some)
            .map_err(|_| CouchDaoError::InvalidRoomRef {
                doc_id,
                value: reservation.room_id,
            })
    }
}

/// Documents that carry an optional `_rev`.
trait WithRevision {
    fn set_rev(&mut self, rev: String);
}

impl WithRevision for CouchDeckDocument {
    fn set_rev(&mut self, rev: String) {
        self.rev = Some(rev);
    }
}

impl WithRevision for CouchQuestionDocument {
    fn set_rev(&mut self, rev: String) {
        self.rev = Some(rev);
    }
}

impl RoomStore for CouchRoomStore {
    fn load_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomRecord>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store
                .get_document::<CouchRoomDocument>(&room_doc_id(id))
                .await?;
            Ok(document.map(|document| document.record))
        })
    }

    fn find_room_id_by_code(&self, code: String) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let store = self.clone();
        Box::pin(async move { store.find_room_id_by_code(&code).await.map_err(Into::into) })
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
        Box::pin(async move {
            for event in events {
                let document = CouchEventDocument::from(event);
                store.put_document(&document.id, &document).await?;
            }
            Ok(())
        })
    }

    fn list_events(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoomEventEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let documents = store
                .list_documents::<CouchEventDocument>(&room_events_prefix(room_id))
                .await?;
            Ok(documents.into_iter().map(|document| document.event).collect())
        })
    }

    fn find_deck(&self, deck_id: String) -> BoxFuture<'static, StorageResult<Option<DeckEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store
                .get_document::<CouchDeckDocument>(&deck_doc_id(&deck_id))
                .await?;
            Ok(document.map(|document| document.deck))
        })
    }

    fn deck_question_ids(&self, deck_id: String) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        Box::pin(async move {
            let documents = store
                .list_documents::<CouchQuestionDocument>(&deck_questions_prefix(&deck_id))
                .await?;
            Ok(documents
                .into_iter()
                .map(|document| document.question.id)
                .collect())
        })
    }

    fn find_question(
        &self,
        deck_id: String,
        question_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store
                .get_document::<CouchQuestionDocument>(&question_doc_id(&deck_id, &question_id))
                .await?;
            Ok(document.map(|document| document.question))
        })
    }

    fn seed_deck(
        &self,
        deck: DeckEntity,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let deck_id = deck_doc_id(&deck.id);
            for question in questions {
                let doc_id = question_doc_id(&question.deck_id, &question.id);
                let document = CouchQuestionDocument {
                    id: doc_id.clone(),
                    rev: None,
                    question,
                };
                store.upsert_document(&doc_id, document).await?;
            }
            let document = CouchDeckDocument {
                id: deck_id.clone(),
                rev: None,
                deck,
            };
            store
                .upsert_document(&deck_id, document)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorized(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
