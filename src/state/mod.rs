pub mod clock;
pub mod connectivity;
pub mod join_code;
pub mod room;
pub mod scheduler;
pub mod scoring;
pub mod state_machine;

use std::{future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{RoomEventEntity, RoomRecord},
        room_store::RoomStore,
        storage::StorageError,
    },
    error::ServiceError,
    state::{
        clock::{Clock, SystemClock},
        connectivity::{reconcile, settle_membership},
        room::{RoomAggregate, RoomDraft, RoomEvent},
    },
};

pub type SharedState = Arc<AppState>;

/// Central application state: storage handle, configuration, clock and the
/// per-room write gates.
pub struct AppState {
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    room_gates: DashMap<Uuid, Arc<Mutex<()>>>,
    mutation_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let mutation_timeout = Some(config.mutation_timeout).filter(|limit| !limit.is_zero());
        Arc::new(Self {
            room_store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            clock,
            room_gates: DashMap::new(),
            mutation_timeout,
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current server time in epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Room store or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        self.room_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn set_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let flagged = *self.degraded.borrow();
        flagged || self.room_store.read().await.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Load a room and reconcile it against the current time without persisting.
    ///
    /// Used by operations that need to look ahead (for instance at the current
    /// round's question) before entering [`AppState::mutate_room`].
    pub async fn preview_room(&self, room_id: Uuid) -> Result<RoomAggregate, ServiceError> {
        let store = self.require_room_store().await?;
        let (draft, _) = self.open_draft(&store, room_id).await?;
        Ok(draft.aggregate)
    }

    /// Stored aggregate, untouched.
    pub async fn load_room(&self, room_id: Uuid) -> Result<RoomAggregate, ServiceError> {
        let store = self.require_room_store().await?;
        let record = store
            .load_room(room_id)
            .await?
            .ok_or_else(ServiceError::room_unavailable)?;
        Ok(RoomAggregate::try_from(record)?)
    }

    /// Drop write gates nobody is waiting on.
    pub fn prune_room_gates(&self) {
        self.room_gates.retain(|_, gate| Arc::strong_count(gate) > 1);
    }

    /// Run one mutation against a room.
    ///
    /// The room is loaded, reconciled (liveness, host failover, overdue pending
    /// action), handed to `operation`, re-settled and written back with a
    /// version check. Nothing is written when `operation` fails. Writers in this
    /// process are serialized per room; writers elsewhere lose the version check
    /// and are retried up to `max_write_retries` times. A room that turns out
    /// to be gone releases its gate.
    pub async fn mutate_room<F, T>(&self, room_id: Uuid, mut operation: F) -> Result<T, ServiceError>
    where
        F: FnMut(&mut RoomDraft) -> Result<T, ServiceError>,
    {
        let gate = self
            .room_gates
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = gate.lock().await;

        let result = self.bounded(async {
            let store = self.require_room_store().await?;
            let mut attempt = 0;
            loop {
                let (mut draft, expected_version) = self.open_draft(&store, room_id).await?;
                let value = operation(&mut draft)?;
                settle_membership(&mut draft);
                let active = draft.aggregate.active_count();
                draft.room_mut().expires_at = self.config.expiry_for(draft.now, active);

                let (aggregate, events) = draft.finish();
                let record = RoomRecord::from(aggregate);
                match store.save_room(record, expected_version).await {
                    Ok(()) => {
                        self.record_events(&store, events).await;
                        return Ok(value);
                    }
                    Err(StorageError::Conflict { .. }) if attempt < self.config.max_write_retries => {
                        attempt += 1;
                        warn!(room_id = %room_id, attempt, "room version moved; retrying mutation");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        })
        .await;

        drop(guard);
        drop(gate);
        if matches!(result, Err(ServiceError::NotFound(_))) {
            self.room_gates
                .remove_if(&room_id, |_, gate| Arc::strong_count(gate) == 1);
        }
        result
    }

    /// Apply the mutation timeout, if any.
    pub async fn bounded<Fut, T>(&self, work: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        match self.mutation_timeout {
            Some(limit) => timeout(limit, work)
                .await
                .map_err(|_| ServiceError::Timeout)?,
            None => work.await,
        }
    }

    /// Load, prefetch what an overdue action needs, and reconcile. Returns the
    /// draft and the version it was loaded at.
    async fn open_draft(
        &self,
        store: &Arc<dyn RoomStore>,
        room_id: Uuid,
    ) -> Result<(RoomDraft, i64), ServiceError> {
        let record = store
            .load_room(room_id)
            .await?
            .ok_or_else(ServiceError::room_unavailable)?;
        let aggregate = RoomAggregate::try_from(record)?;
        let expected_version = aggregate.room.version;
        let now = self.now_ms();

        let needs_pool = aggregate
            .room
            .pending_action
            .as_ref()
            .is_some_and(|action| now >= action.execute_at && action.kind.needs_questions());
        let question_pool = if needs_pool {
            Some(store.deck_question_ids(aggregate.room.deck_id.clone()).await?)
        } else {
            None
        };

        let mut draft = RoomDraft::begin(aggregate, now);
        draft.question_pool = question_pool;
        reconcile(&mut draft, &self.config.liveness());
        Ok((draft, expected_version))
    }

    async fn record_events(&self, store: &Arc<dyn RoomStore>, events: Vec<RoomEvent>) {
        if events.is_empty() {
            return;
        }
        for event in &events {
            info!(
                room_id = %event.room_id,
                event = event.kind.as_str(),
                at = event.at,
                "room event"
            );
        }
        let entities = events.into_iter().map(RoomEventEntity::from).collect();
        if let Err(err) = store.append_events(entities).await {
            warn!(error = %err, "failed to append room events");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{
        dao::room_store::memory::MemoryRoomStore,
        state::{
            clock::ManualClock,
            room::{RoomStatus, fixtures::*},
        },
    };

    async fn state_with_room() -> (SharedState, Arc<ManualClock>, Uuid, MemoryRoomStore) {
        let clock = Arc::new(ManualClock::new(T0));
        let state = AppState::with_clock(AppConfig::default(), clock.clone());
        let store = MemoryRoomStore::new();
        state.set_room_store(Arc::new(store.clone())).await;

        let aggregate = aggregate(guest("h"), &[guest("p")]);
        let room_id = aggregate.room.id;
        store.insert_record(aggregate.into()).unwrap();
        (state, clock, room_id, store)
    }

    #[tokio::test]
    async fn starts_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded().await);
        assert!(matches!(
            state.load_room(Uuid::new_v4()).await,
            Err(ServiceError::Degraded)
        ));

        state.set_room_store(Arc::new(MemoryRoomStore::new())).await;
        assert!(!state.is_degraded().await);
        state.clear_room_store().await;
        assert!(state.is_degraded().await);
    }

    #[tokio::test]
    async fn mutation_bumps_version_and_refreshes_expiry() {
        let (state, clock, room_id, _store) = state_with_room().await;
        clock.advance(1_000);

        state
            .mutate_room(room_id, |draft| {
                draft.room_mut().deck_id = "other".into();
                Ok(())
            })
            .await
            .unwrap();

        let room = state.load_room(room_id).await.unwrap().room;
        assert_eq!(room.version, 2);
        assert_eq!(room.deck_id, "other");
        assert_eq!(room.server_now, T0 + 1_000);
        assert_eq!(room.expires_at, T0 + 1_000 + state.config().room_ttl_ms);
    }

    #[tokio::test]
    async fn failed_operation_writes_nothing() {
        let (state, _clock, room_id, _store) = state_with_room().await;

        let result: Result<(), _> = state
            .mutate_room(room_id, |draft| {
                draft.room_mut().status = RoomStatus::Results;
                Err(ServiceError::InvalidState("nope".into()))
            })
            .await;

        assert!(matches!(result, Err(ServiceError::InvalidState(_))));
        let room = state.load_room(room_id).await.unwrap().room;
        assert_eq!(room.version, 1);
        assert_eq!(room.status, RoomStatus::Lobby);
    }

    #[tokio::test]
    async fn concurrent_writer_triggers_a_retry() {
        let (state, _clock, room_id, store) = state_with_room().await;
        let calls = AtomicU32::new(0);

        state
            .mutate_room(room_id, |_draft| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Another process wins the race for the first attempt.
                    let mut record = store.get_record(room_id).unwrap();
                    record.room.version += 1;
                    store.overwrite_record(record);
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.load_room(room_id).await.unwrap().room.version, 3);
    }

    #[tokio::test]
    async fn unknown_room_is_not_available() {
        let (state, _clock, _room_id, _store) = state_with_room().await;
        let missing = Uuid::new_v4();
        let result = state.mutate_room(missing, |_| Ok(())).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert!(!state.room_gates.contains_key(&missing));
    }

    #[tokio::test]
    async fn live_rooms_keep_their_gate() {
        let (state, _clock, room_id, _store) = state_with_room().await;
        state.mutate_room(room_id, |_| Ok(())).await.unwrap();
        assert!(state.room_gates.contains_key(&room_id));
    }
}
