//! Read-side projections: what a given viewer may see of a room.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{
    phase::VisibleRoomStatus,
    room::{DeckSummary, PendingActionView},
};

/// Full room state as seen by one participant.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomStateResponse {
    pub room: RoomView,
    pub deck: Option<DeckSummary>,
    /// The caller's own seat, when they hold one.
    pub me: Option<ViewerView>,
    /// Active participants in standings order.
    pub participants: Vec<ParticipantView>,
    pub current_round: Option<RoundView>,
}

/// Room header.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomView {
    pub id: Uuid,
    pub code: String,
    pub status: VisibleRoomStatus,
    /// Status that will resume, while paused.
    pub paused_status: Option<VisibleRoomStatus>,
    /// Time left in the frozen phase, while paused.
    pub paused_remaining_ms: Option<i64>,
    pub current_round: u32,
    pub total_rounds: u32,
    /// Server clock at read time; clients derive their offset from it.
    pub server_now: i64,
    pub phase_ends_at: Option<i64>,
    pub pending_action: Option<PendingActionView>,
    pub rules: RulesView,
    pub capacity: usize,
    pub version: i64,
}

/// Match rules.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RulesView {
    pub rounds: u32,
    pub read_seconds: u32,
    pub answer_seconds: u32,
    pub grace_seconds: u32,
    pub reveal_seconds: u32,
    pub leaderboard_seconds: u32,
}

/// The caller's seat.
#[derive(Debug, Serialize, ToSchema)]
pub struct ViewerView {
    pub participant_id: Uuid,
    pub is_host: bool,
    pub is_ready: bool,
    pub total_score: i64,
    pub rank: Option<u32>,
}

/// One ranked participant.
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantView {
    pub id: Uuid,
    pub nickname: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_connected: bool,
    pub total_score: i64,
    pub answers: u32,
    pub avg_response_ms: i64,
    pub rank: u32,
}

/// Current round, redacted per viewer and phase.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundView {
    pub index: u32,
    pub question_id: String,
    /// Hidden during the countdown.
    pub prompt: Option<String>,
    /// Empty during the countdown.
    pub choices: Vec<String>,
    pub started_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub reveal_at: Option<i64>,
    /// Only once revealed.
    pub correct_index: Option<u32>,
    /// How many active participants answered so far.
    pub answered_count: usize,
    /// The caller's answer; correctness only once revealed.
    pub my_answer: Option<AnswerView>,
    /// Everyone's answers, only once revealed.
    pub answers: Vec<AnswerView>,
}

/// One answer.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerView {
    pub participant_id: Uuid,
    pub choice_index: u32,
    pub elapsed_ms: i64,
    pub is_correct: Option<bool>,
    pub score_delta: Option<i64>,
}

/// Pre-match view reachable by join code without any identity.
#[derive(Debug, Serialize, ToSchema)]
pub struct LobbyResponse {
    pub room_id: Uuid,
    pub code: String,
    pub status: VisibleRoomStatus,
    pub deck: Option<DeckSummary>,
    pub participants: Vec<LobbyParticipantView>,
    pub capacity: usize,
    pub pending_action: Option<PendingActionView>,
    pub server_now: i64,
}

/// Participant as listed in the lobby.
#[derive(Debug, Serialize, ToSchema)]
pub struct LobbyParticipantView {
    pub nickname: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_connected: bool,
}
