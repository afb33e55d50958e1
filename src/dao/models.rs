//! Storage-facing representations of rooms, decks and the event log.
//!
//! Ids are persisted as strings and enum tags as their wire names so every
//! backend stores the same shape.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    state::room::{
        ActorIdentity, Answer, Participant, PauseState, PendingAction,
        PendingActionKind, Room, RoomAggregate, RoomEvent, RoomEventKind, RoomStatus, Round,
        Rules,
    },
};

/// Identity columns as stored (`user_id` wins over `identity_id`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityEntity {
    pub user_id: Option<String>,
    pub identity_id: Option<String>,
}

impl From<ActorIdentity> for IdentityEntity {
    fn from(identity: ActorIdentity) -> Self {
        let (user_id, identity_id) = identity.into_parts();
        Self {
            user_id,
            identity_id,
        }
    }
}

impl IdentityEntity {
    fn into_identity(self, owner: &str) -> Result<ActorIdentity, StorageError> {
        ActorIdentity::from_parts(self.user_id, self.identity_id)
            .ok_or_else(|| StorageError::corrupted(owner, "identity has neither user nor guest id"))
    }
}

/// Match rules as stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RulesEntity {
    pub rounds: u32,
    pub read_seconds: u32,
    pub answer_seconds: u32,
    pub grace_seconds: u32,
    pub reveal_seconds: u32,
    pub leaderboard_seconds: u32,
}

impl From<Rules> for RulesEntity {
    fn from(rules: Rules) -> Self {
        Self {
            rounds: rules.rounds,
            read_seconds: rules.read_seconds,
            answer_seconds: rules.answer_seconds,
            grace_seconds: rules.grace_seconds,
            reveal_seconds: rules.reveal_seconds,
            leaderboard_seconds: rules.leaderboard_seconds,
        }
    }
}

impl From<RulesEntity> for Rules {
    fn from(rules: RulesEntity) -> Self {
        Self {
            rounds: rules.rounds,
            read_seconds: rules.read_seconds,
            answer_seconds: rules.answer_seconds,
            grace_seconds: rules.grace_seconds,
            reveal_seconds: rules.reveal_seconds,
            leaderboard_seconds: rules.leaderboard_seconds,
        }
    }
}

/// Pending delayed action as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingActionEntity {
    pub kind: String,
    pub execute_at: i64,
    pub delay_ms: i64,
    pub initiator: IdentityEntity,
    pub label: String,
}

/// Pause snapshot as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PauseStateEntity {
    pub previous_status: String,
    pub remaining_ms: i64,
    pub paused_at: i64,
}

/// Room row.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    pub code: String,
    pub status: String,
    pub host: Option<IdentityEntity>,
    pub deck_id: String,
    pub rules: RulesEntity,
    pub current_round: u32,
    pub total_rounds: u32,
    pub server_now: i64,
    pub phase_ends_at: Option<i64>,
    pub pending_action: Option<PendingActionEntity>,
    pub pause_state: Option<PauseStateEntity>,
    pub created_at: i64,
    pub expires_at: i64,
    pub version: i64,
}

/// Participant row.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    #[serde(flatten)]
    pub identity: IdentityEntity,
    pub nickname: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub total_score: i64,
    pub answers: u32,
    pub avg_response_ms: i64,
    pub joined_at: i64,
    pub last_seen_at: i64,
    pub disconnected_at: Option<i64>,
    pub removed_at: Option<i64>,
}

/// Round row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntity {
    pub index: u32,
    pub question_id: String,
    pub started_at: i64,
    pub closed_at: Option<i64>,
    pub reveal_at: Option<i64>,
}

/// Answer row.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub participant_id: Uuid,
    pub round_index: u32,
    pub choice_index: u32,
    pub client_ts: Option<i64>,
    pub received_at: i64,
    pub elapsed_ms: i64,
    pub is_correct: bool,
    pub score_delta: i64,
}

/// Room with every child row, persisted as one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomRecord {
    pub room: RoomEntity,
    pub participants: Vec<ParticipantEntity>,
    pub rounds: Vec<RoundEntity>,
    pub answers: Vec<AnswerEntity>,
}

impl RoomRecord {
    /// Primary key of the room.
    pub fn id(&self) -> Uuid {
        self.room.id
    }

    /// Number of participants that were not removed.
    pub fn active_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|participant| participant.removed_at.is_none())
            .count()
    }
}

impl From<RoomAggregate> for RoomRecord {
    fn from(aggregate: RoomAggregate) -> Self {
        let RoomAggregate {
            room,
            participants,
            rounds,
            answers,
        } = aggregate;

        Self {
            room: room.into(),
            participants: participants.into_values().map(Into::into).collect(),
            rounds: rounds.into_iter().map(Into::into).collect(),
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<RoomRecord> for RoomAggregate {
    type Error = StorageError;

    fn try_from(record: RoomRecord) -> Result<Self, Self::Error> {
        let room = Room::try_from(record.room)?;
        let mut participants = IndexMap::with_capacity(record.participants.len());
        for entity in record.participants {
            let participant = Participant::try_from(entity)?;
            participants.insert(participant.id, participant);
        }
        let mut rounds: Vec<Round> = record.rounds.into_iter().map(Into::into).collect();
        rounds.sort_by_key(|round| round.index);

        Ok(Self {
            room,
            participants,
            rounds,
            answers: record.answers.into_iter().map(Into::into).collect(),
        })
    }
}

impl From<Room> for RoomEntity {
    fn from(room: Room) -> Self {
        Self {
            id: room.id,
            code: room.code,
            status: room.status.as_str().to_owned(),
            host: room.host.map(Into::into),
            deck_id: room.deck_id,
            rules: room.rules.into(),
            current_round: room.current_round,
            total_rounds: room.total_rounds,
            server_now: room.server_now,
            phase_ends_at: room.phase_ends_at,
            pending_action: room.pending_action.map(|action| PendingActionEntity {
                kind: action.kind.as_str().to_owned(),
                execute_at: action.execute_at,
                delay_ms: action.delay_ms,
                initiator: action.initiator.into(),
                label: action.label,
            }),
            pause_state: room.pause_state.map(|pause| PauseStateEntity {
                previous_status: pause.previous_status.as_str().to_owned(),
                remaining_ms: pause.remaining_ms,
                paused_at: pause.paused_at,
            }),
            created_at: room.created_at,
            expires_at: room.expires_at,
            version: room.version,
        }
    }
}

impl TryFrom<RoomEntity> for Room {
    type Error = StorageError;

    fn try_from(entity: RoomEntity) -> Result<Self, Self::Error> {
        let id = entity.id;
        let status: RoomStatus = entity
            .status
            .parse()
            .map_err(|err| StorageError::corrupted(id, err))?;
        let host = entity
            .host
            .map(|host| host.into_identity(&id.to_string()))
            .transpose()?;
        let pending_action = entity
            .pending_action
            .map(|action| -> Result<PendingAction, StorageError> {
                Ok(PendingAction {
                    kind: action
                        .kind
                        .parse::<PendingActionKind>()
                        .map_err(|err| StorageError::corrupted(id, err))?,
                    execute_at: action.execute_at,
                    delay_ms: action.delay_ms,
                    initiator: action.initiator.into_identity(&id.to_string())?,
                    label: action.label,
                })
            })
            .transpose()?;
        let pause_state = entity
            .pause_state
            .map(|pause| -> Result<PauseState, StorageError> {
                Ok(PauseState {
                    previous_status: pause
                        .previous_status
                        .parse()
                        .map_err(|err| StorageError::corrupted(id, err))?,
                    remaining_ms: pause.remaining_ms,
                    paused_at: pause.paused_at,
                })
            })
            .transpose()?;

        Ok(Self {
            id,
            code: entity.code,
            status,
            host,
            deck_id: entity.deck_id,
            rules: entity.rules.into(),
            current_round: entity.current_round,
            total_rounds: entity.total_rounds,
            server_now: entity.server_now,
            phase_ends_at: entity.phase_ends_at,
            pending_action,
            pause_state,
            created_at: entity.created_at,
            expires_at: entity.expires_at,
            version: entity.version,
        })
    }
}

impl From<Participant> for ParticipantEntity {
    fn from(participant: Participant) -> Self {
        Self {
            id: participant.id,
            identity: participant.identity.into(),
            nickname: participant.nickname,
            is_host: participant.is_host,
            is_ready: participant.is_ready,
            total_score: participant.total_score,
            answers: participant.answers,
            avg_response_ms: participant.avg_response_ms,
            joined_at: participant.joined_at,
            last_seen_at: participant.last_seen_at,
            disconnected_at: participant.disconnected_at,
            removed_at: participant.removed_at,
        }
    }
}

impl TryFrom<ParticipantEntity> for Participant {
    type Error = StorageError;

    fn try_from(entity: ParticipantEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            identity: entity.identity.into_identity(&entity.id.to_string())?,
            nickname: entity.nickname,
            is_host: entity.is_host,
            is_ready: entity.is_ready,
            total_score: entity.total_score,
            answers: entity.answers,
            avg_response_ms: entity.avg_response_ms,
            joined_at: entity.joined_at,
            last_seen_at: entity.last_seen_at,
            disconnected_at: entity.disconnected_at,
            removed_at: entity.removed_at,
        })
    }
}

impl From<Round> for RoundEntity {
    fn from(round: Round) -> Self {
        Self {
            index: round.index,
            question_id: round.question_id,
            started_at: round.started_at,
            closed_at: round.closed_at,
            reveal_at: round.reveal_at,
        }
    }
}

impl From<RoundEntity> for Round {
    fn from(entity: RoundEntity) -> Self {
        Self {
            index: entity.index,
            question_id: entity.question_id,
            started_at: entity.started_at,
            closed_at: entity.closed_at,
            reveal_at: entity.reveal_at,
        }
    }
}

impl From<Answer> for AnswerEntity {
    fn from(answer: Answer) -> Self {
        Self {
            participant_id: answer.participant_id,
            round_index: answer.round_index,
            choice_index: answer.choice_index,
            client_ts: answer.client_ts,
            received_at: answer.received_at,
            elapsed_ms: answer.elapsed_ms,
            is_correct: answer.is_correct,
            score_delta: answer.score_delta,
        }
    }
}

impl From<AnswerEntity> for Answer {
    fn from(entity: AnswerEntity) -> Self {
        Self {
            participant_id: entity.participant_id,
            round_index: entity.round_index,
            choice_index: entity.choice_index,
            client_ts: entity.client_ts,
            received_at: entity.received_at,
            elapsed_ms: entity.elapsed_ms,
            is_correct: entity.is_correct,
            score_delta: entity.score_delta,
        }
    }
}

/// Event payload, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomEventPayload {
    HostTransferred {
        previous: Option<IdentityEntity>,
        next: IdentityEntity,
    },
    ActionCancelled {
        action: String,
        reason: String,
    },
    LobbyRequest {
        requested_by: IdentityEntity,
        action: String,
    },
}

/// Append-only audit log entry.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEventEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    #[serde_as(as = "DisplayFromStr")]
    pub room_id: Uuid,
    pub at: i64,
    #[serde(flatten)]
    pub payload: RoomEventPayload,
}

impl RoomEventEntity {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            RoomEventPayload::HostTransferred { .. } => "host_transferred",
            RoomEventPayload::ActionCancelled { .. } => "action_cancelled",
            RoomEventPayload::LobbyRequest { .. } => "lobby_request",
        }
    }
}

impl From<RoomEvent> for RoomEventEntity {
    fn from(event: RoomEvent) -> Self {
        let payload = match event.kind {
            RoomEventKind::HostTransferred { previous, next } => RoomEventPayload::HostTransferred {
                previous: previous.map(Into::into),
                next: next.into(),
            },
            RoomEventKind::ActionCancelled { action, reason } => RoomEventPayload::ActionCancelled {
                action: action.as_str().to_owned(),
                reason: reason.as_str().to_owned(),
            },
            RoomEventKind::LobbyRequest {
                requested_by,
                action,
            } => RoomEventPayload::LobbyRequest {
                requested_by: requested_by.into(),
                action: action.as_str().to_owned(),
            },
        };

        Self {
            id: event.id,
            room_id: event.room_id,
            at: event.at,
            payload,
        }
    }
}

/// Question deck header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeckEntity {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

/// Multiple-choice question belonging to a deck.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    pub id: String,
    pub deck_id: String,
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::{CancelReason, fixtures::*};

    #[test]
    fn aggregate_survives_storage_mapping() {
        let host = user("u1");
        let mut aggregate = aggregate(host.clone(), &[guest("g1")]);
        aggregate.rounds = rounds(2);
        aggregate.room.status = RoomStatus::Paused;
        aggregate.room.pause_state = Some(PauseState {
            previous_status: RoomStatus::Question,
            remaining_ms: 1_500,
            paused_at: T0,
        });
        aggregate.room.pending_action = Some(PendingAction {
            kind: PendingActionKind::Rematch,
            execute_at: T0 + 3_000,
            delay_ms: 3_000,
            initiator: host,
            label: "Rematch starting".into(),
        });

        let record = RoomRecord::from(aggregate.clone());
        assert_eq!(record.room.status, "paused");
        assert_eq!(record.active_count(), 2);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["room"]["id"], aggregate.room.id.to_string());
        let decoded: RoomRecord = serde_json::from_value(json).unwrap();
        assert_eq!(RoomAggregate::try_from(decoded).unwrap(), aggregate);
    }

    #[test]
    fn unknown_status_is_reported_as_corruption() {
        let mut record = RoomRecord::from(aggregate(guest("h"), &[]));
        record.room.status = "finished".into();
        match RoomAggregate::try_from(record) {
            Err(StorageError::Corrupted { message, .. }) => {
                assert!(message.contains("finished"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn event_payload_is_tagged_by_kind() {
        let event = RoomEvent {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            at: T0,
            kind: RoomEventKind::ActionCancelled {
                action: PendingActionKind::ToLobby,
                reason: CancelReason::HostLeft,
            },
        };
        let entity = RoomEventEntity::from(event);
        assert_eq!(entity.kind(), "action_cancelled");
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["kind"], "action_cancelled");
        assert_eq!(json["action"], "to_lobby");
        assert_eq!(json["reason"], "host_left");
    }
}
