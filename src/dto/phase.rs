use serde::Serialize;
use utoipa::ToSchema;

use crate::state::room::{PendingActionKind, RoomStatus};

/// Publicly visible room status exposed to clients.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleRoomStatus {
    /// Waiting for players.
    Lobby,
    /// Read-in before the question.
    Countdown,
    /// Question open for answers.
    Question,
    /// Late answers still accepted.
    Grace,
    /// Correct answer shown.
    Reveal,
    /// Standings between rounds.
    Leaderboard,
    /// Final standings.
    Results,
    /// Frozen by the host.
    Paused,
}

impl From<RoomStatus> for VisibleRoomStatus {
    fn from(value: RoomStatus) -> Self {
        match value {
            RoomStatus::Lobby => VisibleRoomStatus::Lobby,
            RoomStatus::Countdown => VisibleRoomStatus::Countdown,
            RoomStatus::Question => VisibleRoomStatus::Question,
            RoomStatus::Grace => VisibleRoomStatus::Grace,
            RoomStatus::Reveal => VisibleRoomStatus::Reveal,
            RoomStatus::Leaderboard => VisibleRoomStatus::Leaderboard,
            RoomStatus::Results => VisibleRoomStatus::Results,
            RoomStatus::Paused => VisibleRoomStatus::Paused,
        }
    }
}

/// Delayed action kinds exposed to clients.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisiblePendingAction {
    /// Match start.
    Start,
    /// New match with the same players.
    Rematch,
    /// Back to the lobby.
    ToLobby,
}

impl From<PendingActionKind> for VisiblePendingAction {
    fn from(value: PendingActionKind) -> Self {
        match value {
            PendingActionKind::Start => VisiblePendingAction::Start,
            PendingActionKind::Rematch => VisiblePendingAction::Rematch,
            PendingActionKind::ToLobby => VisiblePendingAction::ToLobby,
        }
    }
}
