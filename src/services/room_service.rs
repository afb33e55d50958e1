//! Business logic behind the room routes. Every mutation runs through
//! [`AppState::mutate_room`](crate::state::AppState::mutate_room), which
//! reconciles liveness and overdue actions before the operation sees the room.

use indexmap::IndexMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{models::RoomRecord, storage::StorageError},
    dto::room::{
        AnswerReceipt, CreateRoomRequest, JoinRoomRequest, LobbyActionOutcome,
        LobbyActionResponse, PendingActionView, RoomAck, RoomEventView, ScheduleActionRequest,
        SeatResponse, SubmitAnswerRequest,
    },
    error::ServiceError,
    state::{
        SharedState,
        clock::format_epoch_ms,
        connectivity::settle_membership,
        join_code,
        room::{
            ActorIdentity, Answer, CancelReason, Participant, PendingActionKind, Room,
            RoomAggregate, RoomDraft, RoomEventKind, RoomStatus,
        },
        scheduler,
        scoring::{elapsed_ms, score_delta},
        state_machine::{PhaseEvent, apply_transition},
    },
};

/// Join code draws before giving up on finding a free one.
const MAX_CODE_ATTEMPTS: usize = 8;

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Open a new room in the lobby with the caller as host.
///
/// Rooms past their expiry are purged first; there is no background sweeper.
pub async fn create_room(
    state: &SharedState,
    actor: ActorIdentity,
    request: CreateRoomRequest,
) -> Result<SeatResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let config = state.config();
    let now = state.now_ms();

    match store.delete_expired_rooms(now).await {
        Ok(0) => {}
        Ok(deleted) => {
            info!(deleted, "purged expired rooms");
            state.prune_room_gates();
        }
        Err(err) => warn!(error = %err, "failed to purge expired rooms"),
    }

    let deck_id = request
        .deck_id
        .or_else(|| config.decks.first().map(|seed| seed.deck.id.clone()))
        .ok_or_else(|| ServiceError::InvalidInput("deck_id is required".into()))?;
    if store.find_deck(deck_id.clone()).await?.is_none() {
        return Err(ServiceError::NotFound(format!("deck `{deck_id}` not found")));
    }

    let rules = request
        .rules
        .as_ref()
        .map(|input| input.merge_into(config.default_rules))
        .unwrap_or(config.default_rules);

    let mut host = Participant::new(actor.clone(), resolve_nickname(request.nickname, 1), now);
    host.is_host = true;
    let participant_id = host.id;
    let room_id = Uuid::new_v4();

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = join_code::generate(config.join_code_length, &mut rand::rng());
        let aggregate = RoomAggregate {
            room: Room {
                id: room_id,
                code: code.clone(),
                status: RoomStatus::Lobby,
                host: Some(actor.clone()),
                deck_id: deck_id.clone(),
                rules,
                current_round: 0,
                total_rounds: 0,
                server_now: now,
                phase_ends_at: None,
                pending_action: None,
                pause_state: None,
                created_at: now,
                expires_at: config.expiry_for(now, 1),
                version: 1,
            },
            participants: IndexMap::from([(participant_id, host.clone())]),
            rounds: Vec::new(),
            answers: Vec::new(),
        };

        match store.insert_room(RoomRecord::from(aggregate)).await {
            Ok(()) => {
                info!(room_id = %room_id, code = %code, deck_id = %deck_id, host = %actor, "room created");
                return Ok(SeatResponse {
                    room_id,
                    code,
                    participant_id,
                    is_host: true,
                    status: RoomStatus::Lobby.into(),
                    server_now: now,
                });
            }
            Err(StorageError::Duplicate { key, value }) => {
                debug!(attempt, key, value = %value, "join code collision; drawing another");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(
        "could not allocate a free join code".into(),
    ))
}

/// Take a seat by join code, or return the caller's existing seat.
///
/// A removed participant may only come back while the room is in the lobby.
pub async fn join_room(
    state: &SharedState,
    actor: ActorIdentity,
    request: JoinRoomRequest,
) -> Result<SeatResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let config = state.config();
    let code = join_code::normalize(&request.code);
    if !join_code::is_well_formed(&code, config.join_code_length) {
        return Err(ServiceError::room_unavailable());
    }
    let room_id = store
        .find_room_id_by_code(code)
        .await?
        .ok_or_else(ServiceError::room_unavailable)?;

    state
        .mutate_room(room_id, |draft| {
            let now = draft.now;
            let existing = draft
                .aggregate
                .participant_by_identity(&actor)
                .map(|participant| (participant.id, participant.is_active()));

            let participant_id = match existing {
                Some((id, true)) => {
                    if let Some(participant) = draft.aggregate.participants.get_mut(&id) {
                        participant.touch(now);
                        if let Some(nickname) = trimmed(request.nickname.as_deref()) {
                            participant.nickname = nickname;
                        }
                    }
                    id
                }
                Some((id, false)) => {
                    if draft.room().status != RoomStatus::Lobby {
                        return Err(ServiceError::InvalidState(
                            "cannot rejoin while a match is in progress".into(),
                        ));
                    }
                    ensure_capacity(draft, config.max_participants)?;
                    if let Some(participant) = draft.aggregate.participants.get_mut(&id) {
                        participant.removed_at = None;
                        participant.is_ready = false;
                        participant.joined_at = now;
                        participant.reset_stats();
                        participant.touch(now);
                        if let Some(nickname) = trimmed(request.nickname.as_deref()) {
                            participant.nickname = nickname;
                        }
                    }
                    info!(room_id = %room_id, participant_id = %id, "participant rejoined");
                    id
                }
                None => {
                    ensure_capacity(draft, config.max_participants)?;
                    let seat_number = draft.aggregate.active_count() + 1;
                    let participant = Participant::new(
                        actor.clone(),
                        resolve_nickname(request.nickname.clone(), seat_number),
                        now,
                    );
                    let id = participant.id;
                    draft.aggregate.participants.insert(id, participant);
                    info!(room_id = %room_id, participant_id = %id, identity = %actor, "participant joined");
                    id
                }
            };

            // An empty room elects its first newcomer.
            settle_membership(draft);
            let room = draft.room();
            Ok(SeatResponse {
                room_id,
                code: room.code.clone(),
                participant_id,
                is_host: draft.aggregate.is_host(&actor),
                status: room.status.into(),
                server_now: now,
            })
        })
        .await
}

/// Soft-remove the caller's seat. Leaving twice is a no-op.
pub async fn leave_room(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    participant_id: Uuid,
) -> Result<RoomAck, ServiceError> {
    state
        .mutate_room(room_id, |draft| {
            own_seat(draft, &actor, participant_id)?;
            let now = draft.now;
            if let Some(participant) = draft.aggregate.participants.get_mut(&participant_id) {
                if participant.is_active() {
                    participant.removed_at = Some(now);
                    participant.is_host = false;
                    participant.is_ready = false;
                    info!(room_id = %room_id, participant_id = %participant_id, "participant left");
                }
            }
            // Hand the room over before acknowledging.
            settle_membership(draft);
            Ok(RoomAck::from(draft.room()))
        })
        .await
}

/// Refresh the caller's liveness. Also the usual trigger for overdue actions.
pub async fn heartbeat(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    participant_id: Uuid,
) -> Result<RoomAck, ServiceError> {
    state
        .mutate_room(room_id, |draft| {
            active_seat(draft, &actor, participant_id)?;
            touch(draft, participant_id);
            Ok(RoomAck::from(draft.room()))
        })
        .await
}

/// Toggle lobby readiness.
pub async fn set_ready(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    participant_id: Uuid,
    ready: bool,
) -> Result<RoomAck, ServiceError> {
    state
        .mutate_room(room_id, |draft| {
            active_seat(draft, &actor, participant_id)?;
            if draft.room().status != RoomStatus::Lobby {
                return Err(ServiceError::InvalidState(
                    "readiness can only change in the lobby".into(),
                ));
            }
            touch(draft, participant_id);
            if let Some(participant) = draft.aggregate.participants.get_mut(&participant_id) {
                participant.is_ready = ready;
            }
            Ok(RoomAck::from(draft.room()))
        })
        .await
}

// ---------------------------------------------------------------------------
// Host controls
// ---------------------------------------------------------------------------

/// Schedule the match start once every other participant is ready.
pub async fn start_match(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    request: ScheduleActionRequest,
) -> Result<LobbyActionResponse, ServiceError> {
    ensure_deck_has_questions(state, room_id).await?;
    let delay_ms = state.config().pending_delay.clamp(request.delay_ms);

    state
        .mutate_room(room_id, |draft| {
            let host_seat = require_host(draft, &actor)?;
            touch(draft, host_seat);

            ensure_lobby_ready(draft)?;

            let action = scheduler::schedule(
                draft,
                PendingActionKind::Start,
                actor.clone(),
                delay_ms,
                request.label.clone(),
            )?;
            Ok(LobbyActionResponse {
                outcome: LobbyActionOutcome::Scheduled,
                pending_action: Some(PendingActionView::from(&action)),
                server_now: draft.now,
            })
        })
        .await
}

/// Advance the room by one phase.
pub async fn progress(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
) -> Result<RoomAck, ServiceError> {
    host_transition(state, actor, room_id, PhaseEvent::Progress).await
}

/// Freeze the current timed phase.
pub async fn pause(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
) -> Result<RoomAck, ServiceError> {
    host_transition(state, actor, room_id, PhaseEvent::Pause).await
}

/// Unfreeze the paused phase with the time it had left.
pub async fn resume(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
) -> Result<RoomAck, ServiceError> {
    host_transition(state, actor, room_id, PhaseEvent::Resume).await
}

/// Jump straight to the final standings.
pub async fn finish(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
) -> Result<RoomAck, ServiceError> {
    host_transition(state, actor, room_id, PhaseEvent::Finish).await
}

async fn host_transition(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    event: PhaseEvent,
) -> Result<RoomAck, ServiceError> {
    state
        .mutate_room(room_id, |draft| {
            let host_seat = require_host(draft, &actor)?;
            touch(draft, host_seat);
            if event == PhaseEvent::Pause && draft.room().pending_action.is_some() {
                return Err(ServiceError::ActionPending);
            }

            let from = draft.room().status;
            let next = apply_transition(draft, event)?;
            info!(room_id = %room_id, from = %from, to = %next, event = ?event, "room transitioned");
            Ok(RoomAck::from(draft.room()))
        })
        .await
}

/// Schedule a return to the lobby (host) or ask the host for one (anyone else).
pub async fn reset_to_lobby(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    request: ScheduleActionRequest,
) -> Result<LobbyActionResponse, ServiceError> {
    lobby_action(state, actor, room_id, PendingActionKind::ToLobby, request).await
}

/// Schedule a rematch (host) or ask the host for one (anyone else).
pub async fn rematch(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    request: ScheduleActionRequest,
) -> Result<LobbyActionResponse, ServiceError> {
    ensure_deck_has_questions(state, room_id).await?;
    lobby_action(state, actor, room_id, PendingActionKind::Rematch, request).await
}

/// Ask to go back to the lobby. From the host this schedules the return.
pub async fn request_lobby(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    request: ScheduleActionRequest,
) -> Result<LobbyActionResponse, ServiceError> {
    lobby_action(state, actor, room_id, PendingActionKind::ToLobby, request).await
}

async fn lobby_action(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    kind: PendingActionKind,
    request: ScheduleActionRequest,
) -> Result<LobbyActionResponse, ServiceError> {
    let delay_ms = state.config().pending_delay.clamp(request.delay_ms);

    state
        .mutate_room(room_id, |draft| {
            let seat = draft
                .aggregate
                .active_participants()
                .find(|participant| participant.identity == actor)
                .map(|participant| participant.id)
                .ok_or_else(|| ServiceError::Unauthorized("caller has no seat in this room".into()))?;
            touch(draft, seat);

            if !draft.aggregate.is_host(&actor) {
                draft.log(RoomEventKind::LobbyRequest {
                    requested_by: actor.clone(),
                    action: kind,
                });
                return Ok(LobbyActionResponse {
                    outcome: LobbyActionOutcome::Requested,
                    pending_action: draft
                        .room()
                        .pending_action
                        .as_ref()
                        .map(PendingActionView::from),
                    server_now: draft.now,
                });
            }

            if kind == PendingActionKind::Rematch {
                ensure_lobby_ready(draft)?;
            }
            let action =
                scheduler::schedule(draft, kind, actor.clone(), delay_ms, request.label.clone())?;
            Ok(LobbyActionResponse {
                outcome: LobbyActionOutcome::Scheduled,
                pending_action: Some(PendingActionView::from(&action)),
                server_now: draft.now,
            })
        })
        .await
}

/// Drop the outstanding delayed action.
pub async fn cancel_pending_action(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
) -> Result<RoomAck, ServiceError> {
    state
        .mutate_room(room_id, |draft| {
            let host_seat = require_host(draft, &actor)?;
            touch(draft, host_seat);
            scheduler::cancel(draft, CancelReason::Cancelled)
                .ok_or_else(|| ServiceError::InvalidState("no action is pending".into()))?;
            Ok(RoomAck::from(draft.room()))
        })
        .await
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// Record the caller's answer to the current round. The first answer wins;
/// later submissions are acknowledged with `accepted = false`.
pub async fn submit_answer(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
    request: SubmitAnswerRequest,
) -> Result<AnswerReceipt, ServiceError> {
    let store = state.require_room_store().await?;

    // The question lives outside the aggregate; look at the reconciled room first.
    let preview = state.preview_room(room_id).await?;
    if !preview.room.status.accepts_answers() {
        return Err(ServiceError::InvalidState("answers are closed".into()));
    }
    let question_id = preview
        .current_round()
        .map(|round| round.question_id.clone())
        .ok_or_else(|| ServiceError::InvalidState("no round is open".into()))?;
    let question = store
        .find_question(preview.room.deck_id.clone(), question_id)
        .await?
        .ok_or_else(ServiceError::room_unavailable)?;

    let SubmitAnswerRequest {
        participant_id,
        choice_index,
        client_ts,
    } = request;

    state
        .mutate_room(room_id, |draft| {
            active_seat(draft, &actor, participant_id)?;
            touch(draft, participant_id);

            if !draft.room().status.accepts_answers() {
                return Err(ServiceError::InvalidState("answers are closed".into()));
            }
            let round = draft
                .aggregate
                .current_round()
                .cloned()
                .ok_or_else(|| ServiceError::InvalidState("no round is open".into()))?;
            if round.question_id != question.id {
                return Err(ServiceError::InvalidState(
                    "the round moved on; refresh and try again".into(),
                ));
            }
            if choice_index as usize >= question.choices.len() {
                return Err(ServiceError::InvalidInput(format!(
                    "choice {choice_index} is out of range (question has {} choices)",
                    question.choices.len()
                )));
            }

            if let Some(existing) = draft.aggregate.answer_for(participant_id, round.index) {
                return Ok(AnswerReceipt {
                    accepted: false,
                    round_index: round.index,
                    received_at: existing.received_at,
                    elapsed_ms: existing.elapsed_ms,
                });
            }

            let now = draft.now;
            let elapsed = elapsed_ms(draft.room(), &round, now);
            let is_correct = choice_index == question.correct_index;
            let delta = score_delta(is_correct, elapsed, draft.room().rules.answer_seconds);

            draft.aggregate.answers.push(Answer {
                participant_id,
                round_index: round.index,
                choice_index,
                client_ts,
                received_at: now,
                elapsed_ms: elapsed,
                is_correct,
                score_delta: delta,
            });
            if let Some(participant) = draft.aggregate.participants.get_mut(&participant_id) {
                participant.record_answer(elapsed, delta);
            }
            debug!(
                room_id = %room_id,
                participant_id = %participant_id,
                round = round.index,
                elapsed_ms = elapsed,
                "answer recorded"
            );

            Ok(AnswerReceipt {
                accepted: true,
                round_index: round.index,
                received_at: now,
                elapsed_ms: elapsed,
            })
        })
        .await
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Host-only view of the room's event log.
pub async fn list_events(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
) -> Result<Vec<RoomEventView>, ServiceError> {
    let store = state.require_room_store().await?;
    let aggregate = state.load_room(room_id).await?;
    if !aggregate.is_host(&actor) {
        return Err(ServiceError::host_only());
    }

    let events = store.list_events(room_id).await?;
    Ok(events
        .into_iter()
        .map(|event| RoomEventView {
            id: event.id,
            kind: event.kind().to_owned(),
            at: event.at,
            at_iso: format_epoch_ms(event.at),
            detail: serde_json::to_value(&event.payload).unwrap_or_default(),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ensure_deck_has_questions(state: &SharedState, room_id: Uuid) -> Result<(), ServiceError> {
    let store = state.require_room_store().await?;
    let deck_id = state.load_room(room_id).await?.room.deck_id;
    if store.deck_question_ids(deck_id.clone()).await?.is_empty() {
        return Err(ServiceError::InvalidState(format!(
            "deck `{deck_id}` has no questions"
        )));
    }
    Ok(())
}

/// The seat must exist and belong to the caller.
fn own_seat(draft: &RoomDraft, actor: &ActorIdentity, participant_id: Uuid) -> Result<(), ServiceError> {
    let participant = draft
        .aggregate
        .participants
        .get(&participant_id)
        .ok_or_else(ServiceError::room_unavailable)?;
    if &participant.identity != actor {
        return Err(ServiceError::Unauthorized(
            "participant does not belong to the caller".into(),
        ));
    }
    Ok(())
}

fn active_seat(
    draft: &RoomDraft,
    actor: &ActorIdentity,
    participant_id: Uuid,
) -> Result<(), ServiceError> {
    own_seat(draft, actor, participant_id)?;
    let active = draft
        .aggregate
        .participants
        .get(&participant_id)
        .is_some_and(Participant::is_active);
    if !active {
        return Err(ServiceError::InvalidState(
            "participant is no longer in the room; join again".into(),
        ));
    }
    Ok(())
}

/// The caller must be the current host; returns the host's seat.
fn require_host(draft: &RoomDraft, actor: &ActorIdentity) -> Result<Uuid, ServiceError> {
    if !draft.aggregate.is_host(actor) {
        return Err(ServiceError::host_only());
    }
    draft
        .aggregate
        .active_participants()
        .find(|participant| &participant.identity == actor)
        .map(|participant| participant.id)
        .ok_or_else(ServiceError::host_only)
}

/// A match launched from the lobby waits until every active non-host is ready.
fn ensure_lobby_ready(draft: &RoomDraft) -> Result<(), ServiceError> {
    if draft.room().status != RoomStatus::Lobby {
        return Ok(());
    }
    let waiting = draft
        .aggregate
        .active_participants()
        .filter(|participant| !participant.is_host && !participant.is_ready)
        .count();
    if waiting > 0 {
        return Err(ServiceError::InvalidState(format!(
            "waiting for {waiting} participant(s) to be ready"
        )));
    }
    Ok(())
}

fn ensure_capacity(draft: &RoomDraft, max_participants: usize) -> Result<(), ServiceError> {
    if draft.aggregate.active_count() >= max_participants {
        return Err(ServiceError::RoomFull(max_participants));
    }
    Ok(())
}

fn touch(draft: &mut RoomDraft, participant_id: Uuid) {
    let now = draft.now;
    if let Some(participant) = draft.aggregate.participants.get_mut(&participant_id) {
        participant.touch(now);
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn resolve_nickname(requested: Option<String>, seat_number: usize) -> String {
    trimmed(requested.as_deref()).unwrap_or_else(|| format!("Player {seat_number}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{DeckEntity, QuestionEntity, RoomEventPayload},
            room_store::{RoomStore, memory::MemoryRoomStore},
        },
        dto::room::RulesInput,
        state::{
            AppState,
            clock::ManualClock,
            room::fixtures::{T0, guest, user},
        },
    };

    struct Harness {
        state: SharedState,
        clock: Arc<ManualClock>,
        store: MemoryRoomStore,
    }

    async fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(T0));
        let state = AppState::with_clock(AppConfig::default(), clock.clone());
        let store = MemoryRoomStore::new();
        let deck = DeckEntity {
            id: "deck".into(),
            title: "Deck".into(),
            description: None,
        };
        let questions = (0..3)
            .map(|i| QuestionEntity {
                id: format!("q{i}"),
                deck_id: "deck".into(),
                prompt: format!("Question {i}"),
                choices: vec!["a".into(), "b".into(), "c".into()],
                correct_index: 1,
            })
            .collect();
        store.seed_deck(deck, questions).await.unwrap();
        state.set_room_store(Arc::new(store.clone())).await;
        Harness { state, clock, store }
    }

    async fn open_room(h: &Harness, host: &ActorIdentity) -> SeatResponse {
        create_room(
            &h.state,
            host.clone(),
            CreateRoomRequest {
                deck_id: Some("deck".into()),
                nickname: Some("Host".into()),
                rules: Some(RulesInput {
                    rounds: Some(2),
                    answer_seconds: Some(10),
                    ..RulesInput::default()
                }),
            },
        )
        .await
        .unwrap()
    }

    async fn join(h: &Harness, seat: &SeatResponse, who: &ActorIdentity) -> SeatResponse {
        join_room(
            &h.state,
            who.clone(),
            JoinRoomRequest {
                code: seat.code.to_lowercase(),
                nickname: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_then_join_is_idempotent() {
        let h = harness().await;
        let host = user("h");
        let seat = open_room(&h, &host).await;
        assert!(seat.is_host);

        let first = join(&h, &seat, &guest("p")).await;
        let again = join(&h, &seat, &guest("p")).await;
        assert_eq!(first.participant_id, again.participant_id);
        assert!(!first.is_host);

        let room = h.state.load_room(seat.room_id).await.unwrap();
        assert_eq!(room.active_count(), 2);
        assert_eq!(room.participants[&first.participant_id].nickname, "Player 2");
    }

    #[tokio::test]
    async fn unknown_deck_and_code_are_rejected() {
        let h = harness().await;
        let result = create_room(
            &h.state,
            guest("h"),
            CreateRoomRequest {
                deck_id: Some("missing".into()),
                ..CreateRoomRequest::default()
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));

        let result = join_room(
            &h.state,
            guest("p"),
            JoinRoomRequest {
                code: "ZZZZZZ".into(),
                nickname: None,
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn room_rejects_joins_beyond_capacity() {
        let h = harness().await;
        let seat = open_room(&h, &guest("h")).await;
        for i in 1..h.state.config().max_participants {
            join(&h, &seat, &guest(&format!("p{i}"))).await;
        }

        let result = join_room(
            &h.state,
            guest("late"),
            JoinRoomRequest {
                code: seat.code.clone(),
                nickname: None,
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::RoomFull(10))));
    }

    #[tokio::test]
    async fn start_requires_readiness_and_rejects_second_schedule() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        let player = guest("p");
        let joined = join(&h, &seat, &player).await;

        let result = start_match(&h.state, host.clone(), seat.room_id, Default::default()).await;
        assert!(matches!(result, Err(ServiceError::InvalidState(_))));

        set_ready(&h.state, player.clone(), seat.room_id, joined.participant_id, true)
            .await
            .unwrap();
        let scheduled = start_match(&h.state, host.clone(), seat.room_id, Default::default())
            .await
            .unwrap();
        assert_eq!(scheduled.outcome, LobbyActionOutcome::Scheduled);
        assert_eq!(scheduled.pending_action.unwrap().execute_at, T0 + 3_000);

        let again = start_match(&h.state, host, seat.room_id, Default::default()).await;
        assert!(matches!(again, Err(ServiceError::ActionPending)));

        let by_player = start_match(&h.state, player, seat.room_id, Default::default()).await;
        assert!(matches!(by_player, Err(ServiceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn answers_are_scored_once() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        start_match(&h.state, host.clone(), seat.room_id, Default::default())
            .await
            .unwrap();

        h.clock.advance(3_000);
        // Overdue start runs on this call, then the host leaves the countdown.
        let ack = progress(&h.state, host.clone(), seat.room_id).await.unwrap();
        assert_eq!(ack.status, RoomStatus::Question.into());

        h.clock.advance(2_000);
        let request = || SubmitAnswerRequest {
            participant_id: seat.participant_id,
            choice_index: 1,
            client_ts: Some(12),
        };
        let receipt = submit_answer(&h.state, host.clone(), seat.room_id, request())
            .await
            .unwrap();
        assert!(receipt.accepted);
        assert_eq!(receipt.elapsed_ms, 2_000);

        h.clock.advance(500);
        let duplicate = submit_answer(&h.state, host.clone(), seat.room_id, request())
            .await
            .unwrap();
        assert!(!duplicate.accepted);
        assert_eq!(duplicate.received_at, receipt.received_at);

        let room = h.state.load_room(seat.room_id).await.unwrap();
        assert_eq!(room.answers.len(), 1);
        assert_eq!(room.participants[&seat.participant_id].total_score, 140);
    }

    #[tokio::test]
    async fn out_of_range_choice_is_invalid_input() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        start_match(&h.state, host.clone(), seat.room_id, Default::default())
            .await
            .unwrap();
        h.clock.advance(3_000);
        progress(&h.state, host.clone(), seat.room_id).await.unwrap();

        let result = submit_answer(
            &h.state,
            host,
            seat.room_id,
            SubmitAnswerRequest {
                participant_id: seat.participant_id,
                choice_index: 7,
                client_ts: None,
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn non_host_lobby_request_is_only_logged() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        let player = guest("p");
        join(&h, &seat, &player).await;

        let response = request_lobby(&h.state, player.clone(), seat.room_id, Default::default())
            .await
            .unwrap();
        assert_eq!(response.outcome, LobbyActionOutcome::Requested);
        assert!(response.pending_action.is_none());

        let events = list_events(&h.state, host, seat.room_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "lobby_request");
        assert!(matches!(
            list_events(&h.state, player, seat.room_id).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn pause_is_refused_while_nothing_runs() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        assert!(matches!(
            pause(&h.state, host.clone(), seat.room_id).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(matches!(
            cancel_pending_action(&h.state, host, seat.room_id).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn leaving_host_hands_over_and_cancels_pending_start() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        let player = user("p");
        let joined = join(&h, &seat, &player).await;
        set_ready(&h.state, player.clone(), seat.room_id, joined.participant_id, true)
            .await
            .unwrap();
        start_match(&h.state, host.clone(), seat.room_id, Default::default())
            .await
            .unwrap();

        leave_room(&h.state, host.clone(), seat.room_id, seat.participant_id)
            .await
            .unwrap();
        // Leaving again is harmless.
        leave_room(&h.state, host, seat.room_id, seat.participant_id)
            .await
            .unwrap();

        let room = h.state.load_room(seat.room_id).await.unwrap();
        assert_eq!(room.room.host, Some(player));
        assert!(room.room.pending_action.is_none());
        let events = h.store.list_events(seat.room_id).await.unwrap();
        let kinds: Vec<_> = events.iter().map(|event| event.kind()).collect();
        assert_eq!(kinds, ["host_transferred", "action_cancelled"]);
    }

    #[tokio::test]
    async fn removed_participant_cannot_rejoin_mid_match() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        let player = guest("p");
        let joined = join(&h, &seat, &player).await;
        set_ready(&h.state, player.clone(), seat.room_id, joined.participant_id, true)
            .await
            .unwrap();
        leave_room(&h.state, player.clone(), seat.room_id, joined.participant_id)
            .await
            .unwrap();
        start_match(&h.state, host.clone(), seat.room_id, Default::default())
            .await
            .unwrap();
        h.clock.advance(3_000);
        heartbeat(&h.state, host, seat.room_id, seat.participant_id)
            .await
            .unwrap();

        let result = join_room(
            &h.state,
            player,
            JoinRoomRequest {
                code: seat.code.clone(),
                nickname: None,
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn removed_participant_rejoins_same_seat_in_lobby() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        let player = guest("p");
        let joined = join(&h, &seat, &player).await;
        let id = joined.participant_id;

        h.clock.advance(1_000);
        leave_room(&h.state, player.clone(), seat.room_id, id)
            .await
            .unwrap();
        h.state
            .mutate_room(seat.room_id, |draft| {
                let participant = draft.aggregate.participants.get_mut(&id).unwrap();
                participant.is_ready = true;
                participant.record_answer(1_500, 140);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(h.state.load_room(seat.room_id).await.unwrap().active_count(), 1);

        h.clock.advance(1_000);
        let rejoined = join(&h, &seat, &player).await;
        assert_eq!(rejoined.participant_id, id);
        assert!(!rejoined.is_host);

        let room = h.state.load_room(seat.room_id).await.unwrap();
        assert_eq!(room.active_count(), 2);
        let participant = &room.participants[&id];
        assert_eq!(participant.removed_at, None);
        assert!(!participant.is_ready);
        assert_eq!(participant.joined_at, T0 + 2_000);
        assert_eq!(participant.total_score, 0);
        assert_eq!(participant.answers, 0);
        assert_eq!(participant.avg_response_ms, 0);
    }

    #[tokio::test]
    async fn last_leave_cancels_pending_start_as_room_empty() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        start_match(&h.state, host.clone(), seat.room_id, Default::default())
            .await
            .unwrap();

        let ack = leave_room(&h.state, host, seat.room_id, seat.participant_id)
            .await
            .unwrap();
        assert_eq!(ack.status, RoomStatus::Lobby.into());

        let room = h.state.load_room(seat.room_id).await.unwrap();
        assert_eq!(room.active_count(), 0);
        assert!(room.room.pending_action.is_none());

        let events = h.store.list_events(seat.room_id).await.unwrap();
        assert!(events.iter().any(|event| event.payload
            == RoomEventPayload::ActionCancelled {
                action: "start".into(),
                reason: "room_empty".into(),
            }));
    }

    #[tokio::test]
    async fn rematch_from_lobby_waits_for_readiness() {
        let h = harness().await;
        let host = guest("h");
        let seat = open_room(&h, &host).await;
        let player = guest("p");
        let joined = join(&h, &seat, &player).await;

        let result = rematch(&h.state, host.clone(), seat.room_id, Default::default()).await;
        assert!(matches!(result, Err(ServiceError::InvalidState(_))));
        assert!(
            h.state
                .load_room(seat.room_id)
                .await
                .unwrap()
                .room
                .pending_action
                .is_none()
        );

        set_ready(&h.state, player, seat.room_id, joined.participant_id, true)
            .await
            .unwrap();
        let scheduled = rematch(&h.state, host, seat.room_id, Default::default())
            .await
            .unwrap();
        assert_eq!(scheduled.outcome, LobbyActionOutcome::Scheduled);
    }
}
