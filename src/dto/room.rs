use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        phase::{VisiblePendingAction, VisibleRoomStatus},
        validation::{validate_join_code, validate_nickname},
    },
    state::room::{PendingAction, Room, Rules},
};

/// Payload used to open a new room.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    /// Deck to draw questions from; the first configured deck when omitted.
    #[serde(default)]
    pub deck_id: Option<String>,
    /// Host's display name.
    #[serde(default)]
    #[validate(custom(function = "validate_nickname"))]
    pub nickname: Option<String>,
    /// Overrides applied on top of the configured default rules.
    #[serde(default)]
    #[validate(nested)]
    pub rules: Option<RulesInput>,
}

/// Partial rules; omitted fields keep their configured default.
#[derive(Debug, Default, Clone, Deserialize, ToSchema, Validate)]
pub struct RulesInput {
    #[validate(range(min = 1, max = 50))]
    pub rounds: Option<u32>,
    #[validate(range(max = 30))]
    pub read_seconds: Option<u32>,
    #[validate(range(min = 1, max = 120))]
    pub answer_seconds: Option<u32>,
    #[validate(range(max = 10))]
    pub grace_seconds: Option<u32>,
    #[validate(range(max = 30))]
    pub reveal_seconds: Option<u32>,
    #[validate(range(max = 30))]
    pub leaderboard_seconds: Option<u32>,
}

impl RulesInput {
    /// Overlay the provided fields on `base`.
    pub fn merge_into(&self, base: Rules) -> Rules {
        Rules {
            rounds: self.rounds.unwrap_or(base.rounds),
            read_seconds: self.read_seconds.unwrap_or(base.read_seconds),
            answer_seconds: self.answer_seconds.unwrap_or(base.answer_seconds),
            grace_seconds: self.grace_seconds.unwrap_or(base.grace_seconds),
            reveal_seconds: self.reveal_seconds.unwrap_or(base.reveal_seconds),
            leaderboard_seconds: self.leaderboard_seconds.unwrap_or(base.leaderboard_seconds),
        }
    }
}

/// Payload used to take a seat in a room by its join code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinRoomRequest {
    #[validate(custom(function = "validate_join_code"))]
    pub code: String,
    #[serde(default)]
    #[validate(custom(function = "validate_nickname"))]
    pub nickname: Option<String>,
}

/// Body of the seat-scoped operations (leave, heartbeat).
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ParticipantRequest {
    pub participant_id: Uuid,
}

/// Lobby readiness toggle.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SetReadyRequest {
    pub participant_id: Uuid,
    pub ready: bool,
}

/// Options for scheduling a delayed action (start, rematch, return to lobby).
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct ScheduleActionRequest {
    /// Requested delay; clamped server-side.
    #[serde(default)]
    #[validate(range(min = 0, max = 60_000))]
    pub delay_ms: Option<i64>,
    /// Banner label; a default per action is used when omitted.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub label: Option<String>,
}

/// One answer to the current round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    pub participant_id: Uuid,
    #[validate(range(max = 16))]
    pub choice_index: u32,
    /// Client clock at the time of the tap; informational only.
    #[serde(default)]
    pub client_ts: Option<i64>,
}

/// Returned by `create` and `join`: the caller's seat.
#[derive(Debug, Serialize, ToSchema)]
pub struct SeatResponse {
    pub room_id: Uuid,
    pub code: String,
    pub participant_id: Uuid,
    pub is_host: bool,
    pub status: VisibleRoomStatus,
    pub server_now: i64,
}

/// Acknowledgement of a mutation with the resulting room position.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomAck {
    pub room_id: Uuid,
    pub status: VisibleRoomStatus,
    pub current_round: u32,
    pub phase_ends_at: Option<i64>,
    pub server_now: i64,
    pub version: i64,
}

impl From<&Room> for RoomAck {
    fn from(room: &Room) -> Self {
        Self {
            room_id: room.id,
            status: room.status.into(),
            current_round: room.current_round,
            phase_ends_at: room.phase_ends_at,
            server_now: room.server_now,
            version: room.version,
        }
    }
}

/// Pending delayed action as shown on banners.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PendingActionView {
    pub kind: VisiblePendingAction,
    pub execute_at: i64,
    pub delay_ms: i64,
    pub label: String,
}

impl From<&PendingAction> for PendingActionView {
    fn from(action: &PendingAction) -> Self {
        Self {
            kind: action.kind.into(),
            execute_at: action.execute_at,
            delay_ms: action.delay_ms,
            label: action.label.clone(),
        }
    }
}

/// What became of a lobby-level request.
#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LobbyActionOutcome {
    /// The host's call scheduled the action.
    Scheduled,
    /// A non-host's call was recorded for the host to act on.
    Requested,
}

/// Result of `start`, `rematch`, `reset` and `request-lobby`.
#[derive(Debug, Serialize, ToSchema)]
pub struct LobbyActionResponse {
    pub outcome: LobbyActionOutcome,
    pub pending_action: Option<PendingActionView>,
    pub server_now: i64,
}

/// Receipt for a submitted answer; correctness stays hidden until the reveal.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerReceipt {
    /// `false` when an answer for this round was already stored.
    pub accepted: bool,
    pub round_index: u32,
    pub received_at: i64,
    pub elapsed_ms: i64,
}

/// Deck header.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeckSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

/// Audit log entry shown to the host.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomEventView {
    pub id: Uuid,
    pub kind: String,
    pub at: i64,
    /// RFC 3339 rendering of `at`.
    pub at_iso: String,
    #[schema(value_type = Object)]
    pub detail: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::*;

    #[test]
    fn rules_overlay_keeps_defaults() {
        let input = RulesInput {
            rounds: Some(3),
            answer_seconds: Some(15),
            ..RulesInput::default()
        };
        let merged = input.merge_into(Rules::default());
        assert_eq!(merged.rounds, 3);
        assert_eq!(merged.answer_seconds, 15);
        assert_eq!(merged.read_seconds, Rules::default().read_seconds);
    }

    #[test]
    fn create_request_validates_nested_rules() {
        let request: CreateRoomRequest =
            serde_json::from_str(r#"{ "rules": { "answer_seconds": 0 } }"#).unwrap();
        assert!(request.validate().is_err());

        let request: CreateRoomRequest =
            serde_json::from_str(r#"{ "nickname": "Ada", "rules": { "rounds": 5 } }"#).unwrap();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn join_request_rejects_malformed_codes() {
        let request: JoinRoomRequest = serde_json::from_str(r#"{ "code": "ab0" }"#).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn schedule_request_accepts_empty_body() {
        let request: ScheduleActionRequest = serde_json::from_str("{}").unwrap();
        assert!(request.validate().is_ok());
        assert!(request.delay_ms.is_none());
    }
}
