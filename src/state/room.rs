//! Runtime representation of a live room: the aggregate every operation loads,
//! mutates on a draft copy, and persists back in one write.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

/// Identity of the caller, resolved by the auth layer before any mutation.
///
/// Exactly one variant is authoritative for a participant: a durable user id
/// always wins over a guest key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActorIdentity {
    /// Authenticated account with a durable id.
    User(String),
    /// Guest pseudo-identity derived from a client-held key.
    Guest(String),
}

impl ActorIdentity {
    /// Rebuild an identity from its persisted parts, preferring the durable user id.
    pub fn from_parts(user_id: Option<String>, identity_id: Option<String>) -> Option<Self> {
        match (user_id, identity_id) {
            (Some(user), _) => Some(Self::User(user)),
            (None, Some(key)) => Some(Self::Guest(key)),
            (None, None) => None,
        }
    }

    /// Split the identity into `(user_id, identity_id)` columns.
    pub fn into_parts(self) -> (Option<String>, Option<String>) {
        match self {
            Self::User(id) => (Some(id), None),
            Self::Guest(key) => (None, Some(key)),
        }
    }

    /// Whether the identity belongs to an authenticated account.
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Guest(key) => write!(f, "guest:{key}"),
        }
    }
}

/// Stage of the match lifecycle a room is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomStatus {
    /// Waiting for participants; readiness can be toggled.
    Lobby,
    /// Short read-in before the question is shown.
    Countdown,
    /// Question is open for answers.
    Question,
    /// Late-answer window after the official deadline.
    Grace,
    /// Correct answer and everyone's choices are revealed.
    Reveal,
    /// Standings between rounds.
    Leaderboard,
    /// Final standings.
    Results,
    /// Timed phase frozen by the host.
    Paused,
}

impl RoomStatus {
    /// Statuses the host may freeze with `pause`.
    pub fn is_pausable(self) -> bool {
        matches!(
            self,
            Self::Countdown | Self::Question | Self::Grace | Self::Reveal | Self::Leaderboard
        )
    }

    /// Statuses in which answers are accepted.
    pub fn accepts_answers(self) -> bool {
        matches!(self, Self::Question | Self::Grace)
    }

    /// Statuses in which the current round's answer is public.
    pub fn is_revealed(self) -> bool {
        matches!(self, Self::Reveal | Self::Leaderboard | Self::Results)
    }

    /// Stable storage/wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Countdown => "countdown",
            Self::Question => "question",
            Self::Grace => "grace",
            Self::Reveal => "reveal",
            Self::Leaderboard => "leaderboard",
            Self::Results => "results",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a persisted enum tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownTag {
    /// What was being parsed.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

impl FromStr for RoomStatus {
    type Err = UnknownTag;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let status = match value {
            "lobby" => Self::Lobby,
            "countdown" => Self::Countdown,
            "question" => Self::Question,
            "grace" => Self::Grace,
            "reveal" => Self::Reveal,
            "leaderboard" => Self::Leaderboard,
            "results" => Self::Results,
            "paused" => Self::Paused,
            other => {
                return Err(UnknownTag {
                    kind: "room status",
                    value: other.to_owned(),
                });
            }
        };
        Ok(status)
    }
}

/// Per-match rules chosen at room creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    /// Requested number of rounds (capped by the deck size at start).
    pub rounds: u32,
    /// Countdown budget before each question.
    pub read_seconds: u32,
    /// Official answer window.
    pub answer_seconds: u32,
    /// Late-answer window after the official one.
    pub grace_seconds: u32,
    /// Time spent on the reveal screen.
    pub reveal_seconds: u32,
    /// Time spent on the between-rounds leaderboard.
    pub leaderboard_seconds: u32,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            rounds: 10,
            read_seconds: 3,
            answer_seconds: 20,
            grace_seconds: 2,
            reveal_seconds: 5,
            leaderboard_seconds: 5,
        }
    }
}

impl Rules {
    /// Budget of a timed status in milliseconds; `None` for untimed statuses.
    pub fn phase_budget_ms(&self, status: RoomStatus) -> Option<i64> {
        let seconds = match status {
            RoomStatus::Countdown => self.read_seconds,
            RoomStatus::Question => self.answer_seconds,
            RoomStatus::Grace => self.grace_seconds,
            RoomStatus::Reveal => self.reveal_seconds,
            RoomStatus::Leaderboard => self.leaderboard_seconds,
            RoomStatus::Lobby | RoomStatus::Results | RoomStatus::Paused => return None,
        };
        Some(i64::from(seconds) * 1_000)
    }

    /// Official answer window in milliseconds.
    pub fn answer_window_ms(&self) -> i64 {
        i64::from(self.answer_seconds) * 1_000
    }
}

/// Kinds of delayed, host-initiated actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingActionKind {
    /// Generate rounds and begin the match from the lobby.
    Start,
    /// Reset scores, reshuffle rounds and play again.
    Rematch,
    /// Reset scores and go back to the lobby.
    ToLobby,
}

impl PendingActionKind {
    /// Stable storage/wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Rematch => "rematch",
            Self::ToLobby => "to_lobby",
        }
    }

    /// Default label shown to clients while the action is pending.
    pub fn default_label(self) -> &'static str {
        match self {
            Self::Start => "Match starting",
            Self::Rematch => "Rematch starting",
            Self::ToLobby => "Returning to lobby",
        }
    }

    /// Whether applying the action needs the deck's question pool.
    pub fn needs_questions(self) -> bool {
        matches!(self, Self::Start | Self::Rematch)
    }

    /// Whether the room status still allows this action to run.
    pub fn precondition_holds(self, status: RoomStatus) -> bool {
        match self {
            Self::Start => status == RoomStatus::Lobby,
            Self::Rematch => matches!(status, RoomStatus::Results | RoomStatus::Lobby),
            Self::ToLobby => status == RoomStatus::Results,
        }
    }
}

impl FromStr for PendingActionKind {
    type Err = UnknownTag;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "start" => Ok(Self::Start),
            "rematch" => Ok(Self::Rematch),
            "to_lobby" => Ok(Self::ToLobby),
            other => Err(UnknownTag {
                kind: "pending action",
                value: other.to_owned(),
            }),
        }
    }
}

/// Delayed action waiting for its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// What will happen.
    pub kind: PendingActionKind,
    /// Absolute deadline (epoch ms) after which the action is applied.
    pub execute_at: i64,
    /// Clamped delay that produced `execute_at`.
    pub delay_ms: i64,
    /// Who scheduled it.
    pub initiator: ActorIdentity,
    /// Human readable label for banners.
    pub label: String,
}

/// Snapshot captured on pause so resume can restore the exact remaining time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseState {
    /// Status to return to on resume.
    pub previous_status: RoomStatus,
    /// Time that was left in the frozen phase.
    pub remaining_ms: i64,
    /// When the pause happened (epoch ms).
    pub paused_at: i64,
}

/// One live match instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Primary key.
    pub id: Uuid,
    /// Human-entered join code.
    pub code: String,
    /// Current lifecycle stage.
    pub status: RoomStatus,
    /// Current authoritative host.
    pub host: Option<ActorIdentity>,
    /// Deck the rounds are drawn from.
    pub deck_id: String,
    /// Match rules.
    pub rules: Rules,
    /// Index of the current round.
    pub current_round: u32,
    /// Number of generated rounds.
    pub total_rounds: u32,
    /// Server clock anchor of the last mutation (epoch ms).
    pub server_now: i64,
    /// Absolute deadline of the current timed phase.
    pub phase_ends_at: Option<i64>,
    /// Outstanding delayed action, at most one.
    pub pending_action: Option<PendingAction>,
    /// Present iff `status == Paused`.
    pub pause_state: Option<PauseState>,
    /// Creation time (epoch ms).
    pub created_at: i64,
    /// After this instant an empty room may be deleted.
    pub expires_at: i64,
    /// Monotonic mutation counter.
    pub version: i64,
}

/// One seat in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Primary key.
    pub id: Uuid,
    /// Who sits in the seat.
    pub identity: ActorIdentity,
    /// Display name.
    pub nickname: String,
    /// Mirrors `Room::host` for active participants.
    pub is_host: bool,
    /// Lobby readiness.
    pub is_ready: bool,
    /// Accumulated score for the current match.
    pub total_score: i64,
    /// Number of answers submitted in the current match.
    pub answers: u32,
    /// Mean response time over submitted answers.
    pub avg_response_ms: i64,
    /// First time the seat was taken (epoch ms).
    pub joined_at: i64,
    /// Last heartbeat or action (epoch ms).
    pub last_seen_at: i64,
    /// Set when liveness was lost, cleared on recovery.
    pub disconnected_at: Option<i64>,
    /// Soft-delete marker.
    pub removed_at: Option<i64>,
}

impl Participant {
    /// Create a fresh, connected participant.
    pub fn new(identity: ActorIdentity, nickname: String, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            nickname,
            is_host: false,
            is_ready: false,
            total_score: 0,
            answers: 0,
            avg_response_ms: 0,
            joined_at: now,
            last_seen_at: now,
            disconnected_at: None,
            removed_at: None,
        }
    }

    /// Active participants count toward capacity, hosting and scoring.
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }

    /// Whether a heartbeat was seen within `timeout_ms`.
    pub fn is_connected(&self, now: i64, timeout_ms: i64) -> bool {
        now - self.last_seen_at <= timeout_ms
    }

    /// Record activity from the participant's client.
    pub fn touch(&mut self, now: i64) {
        self.last_seen_at = now;
        self.disconnected_at = None;
    }

    /// Zero match statistics ahead of a new match.
    pub fn reset_stats(&mut self) {
        self.total_score = 0;
        self.answers = 0;
        self.avg_response_ms = 0;
    }

    /// Fold one answer into the statistics.
    pub fn record_answer(&mut self, elapsed_ms: i64, score_delta: i64) {
        let count = i64::from(self.answers);
        self.avg_response_ms = (self.avg_response_ms * count + elapsed_ms) / (count + 1);
        self.answers += 1;
        self.total_score += score_delta;
    }
}

/// One question slot within the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    /// Position in the match.
    pub index: u32,
    /// Question shown in this round.
    pub question_id: String,
    /// When the question opened; 0 until the round begins.
    pub started_at: i64,
    /// When the official answer window closed.
    pub closed_at: Option<i64>,
    /// When the answer was revealed.
    pub reveal_at: Option<i64>,
}

/// One participant's response to one round. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Who answered.
    pub participant_id: Uuid,
    /// Which round.
    pub round_index: u32,
    /// Selected choice.
    pub choice_index: u32,
    /// Client-reported timestamp, kept for diagnostics only.
    pub client_ts: Option<i64>,
    /// Server receipt time (epoch ms).
    pub received_at: i64,
    /// Server-computed response time.
    pub elapsed_ms: i64,
    /// Whether the choice matched the question's answer.
    pub is_correct: bool,
    /// Points awarded.
    pub score_delta: i64,
}

/// Why a pending action was dropped without being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The host cancelled it explicitly.
    Cancelled,
    /// The initiating host lost host authority.
    HostLeft,
    /// The room's status no longer matches the action's precondition.
    InvalidState,
    /// Every participant left.
    RoomEmpty,
    /// The deck had no questions when the action ran.
    NoQuestions,
}

impl CancelReason {
    /// Stable storage/wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::HostLeft => "host_left",
            Self::InvalidState => "invalid_state",
            Self::RoomEmpty => "room_empty",
            Self::NoQuestions => "no_questions",
        }
    }
}

/// Notable events appended to the room's audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEventKind {
    /// Host authority moved to another participant.
    HostTransferred {
        /// Host before the election, if any.
        previous: Option<ActorIdentity>,
        /// Newly elected host.
        next: ActorIdentity,
    },
    /// A pending action was discarded.
    ActionCancelled {
        /// Which action.
        action: PendingActionKind,
        /// Why.
        reason: CancelReason,
    },
    /// A non-host asked the host for a lobby-level action.
    LobbyRequest {
        /// Who asked.
        requested_by: ActorIdentity,
        /// What they asked for.
        action: PendingActionKind,
    },
}

impl RoomEventKind {
    /// Stable storage/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostTransferred { .. } => "host_transferred",
            Self::ActionCancelled { .. } => "action_cancelled",
            Self::LobbyRequest { .. } => "lobby_request",
        }
    }
}

/// Audit log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    /// Primary key.
    pub id: Uuid,
    /// Owning room.
    pub room_id: Uuid,
    /// When it happened (epoch ms).
    pub at: i64,
    /// What happened.
    pub kind: RoomEventKind,
}

/// Room plus every child record, loaded and saved as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAggregate {
    /// The room record.
    pub room: Room,
    /// Seats keyed by participant id, in join order.
    pub participants: IndexMap<Uuid, Participant>,
    /// Pre-generated rounds, ordered by index.
    pub rounds: Vec<Round>,
    /// Stored answers for the current match.
    pub answers: Vec<Answer>,
}

impl RoomAggregate {
    /// Participants that have not been removed.
    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values().filter(|p| p.is_active())
    }

    /// Number of active participants.
    pub fn active_count(&self) -> usize {
        self.active_participants().count()
    }

    /// Any seat (active or removed) held by `identity`.
    pub fn participant_by_identity(&self, identity: &ActorIdentity) -> Option<&Participant> {
        self.participants.values().find(|p| &p.identity == identity)
    }

    /// Whether `identity` is the current host and still holds an active seat.
    pub fn is_host(&self, identity: &ActorIdentity) -> bool {
        self.room.host.as_ref() == Some(identity)
            && self
                .active_participants()
                .any(|participant| &participant.identity == identity)
    }

    /// Round at `current_round`, if rounds were generated.
    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.get(self.room.current_round as usize)
    }

    /// Mutable round at `current_round`.
    pub fn current_round_mut(&mut self) -> Option<&mut Round> {
        let index = self.room.current_round as usize;
        self.rounds.get_mut(index)
    }

    /// Stored answer for a participant in a round.
    pub fn answer_for(&self, participant_id: Uuid, round_index: u32) -> Option<&Answer> {
        self.answers
            .iter()
            .find(|a| a.participant_id == participant_id && a.round_index == round_index)
    }

    /// Status that decides what the current round exposes (paused rooms use the frozen status).
    pub fn effective_status(&self) -> RoomStatus {
        match (self.room.status, self.room.pause_state) {
            (RoomStatus::Paused, Some(pause)) => pause.previous_status,
            (status, _) => status,
        }
    }

    /// Zero every participant's statistics and drop all rounds and answers.
    pub fn clear_match(&mut self) {
        for participant in self.participants.values_mut() {
            participant.reset_stats();
        }
        self.rounds.clear();
        self.answers.clear();
        self.room.current_round = 0;
        self.room.total_rounds = 0;
    }
}

/// Working copy of an aggregate for a single mutation, collecting audit events
/// until the whole result is persisted at once.
#[derive(Debug, Clone)]
pub struct RoomDraft {
    /// Aggregate being mutated.
    pub aggregate: RoomAggregate,
    /// Server time of this mutation (epoch ms).
    pub now: i64,
    /// Deck question ids, loaded only when an overdue action needs them.
    pub question_pool: Option<Vec<String>>,
    events: Vec<RoomEvent>,
}

impl RoomDraft {
    /// Open a draft: bumps the version and anchors the server clock.
    pub fn begin(mut aggregate: RoomAggregate, now: i64) -> Self {
        aggregate.room.version += 1;
        aggregate.room.server_now = now;
        Self {
            aggregate,
            now,
            question_pool: None,
            events: Vec::new(),
        }
    }

    /// Shorthand for the room record.
    pub fn room(&self) -> &Room {
        &self.aggregate.room
    }

    /// Mutable shorthand for the room record.
    pub fn room_mut(&mut self) -> &mut Room {
        &mut self.aggregate.room
    }

    /// Queue an audit event.
    pub fn log(&mut self, kind: RoomEventKind) {
        self.events.push(RoomEvent {
            id: Uuid::new_v4(),
            room_id: self.aggregate.room.id,
            at: self.now,
            kind,
        });
    }

    /// Events queued so far.
    pub fn events(&self) -> &[RoomEvent] {
        &self.events
    }

    /// Close the draft, yielding the aggregate to persist and its events.
    pub fn finish(self) -> (RoomAggregate, Vec<RoomEvent>) {
        (self.aggregate, self.events)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn identity_prefers_user_id() {
        let identity = ActorIdentity::from_parts(Some("u1".into()), Some("g1".into()));
        assert_eq!(identity, Some(user("u1")));
        assert_eq!(guest("k").into_parts(), (None, Some("k".into())));
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            RoomStatus::Lobby,
            RoomStatus::Countdown,
            RoomStatus::Question,
            RoomStatus::Grace,
            RoomStatus::Reveal,
            RoomStatus::Leaderboard,
            RoomStatus::Results,
            RoomStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<RoomStatus>(), Ok(status));
        }
        assert!("finished".parse::<RoomStatus>().is_err());
    }

    #[test]
    fn answer_statistics_average_response_time() {
        let mut seat = Participant::new(guest("a"), "a".into(), T0);
        seat.record_answer(2_000, 140);
        seat.record_answer(4_000, 0);
        assert_eq!(seat.answers, 2);
        assert_eq!(seat.total_score, 140);
        assert_eq!(seat.avg_response_ms, 3_000);
    }

    #[test]
    fn draft_bumps_version_and_anchors_clock() {
        let aggregate = aggregate(guest("h"), &[]);
        let draft = RoomDraft::begin(aggregate, T0 + 500);
        assert_eq!(draft.room().version, 2);
        assert_eq!(draft.room().server_now, T0 + 500);
    }

    #[test]
    fn host_check_ignores_removed_seat() {
        let host = guest("h");
        let mut aggregate = aggregate(host.clone(), &[guest("p")]);
        assert!(aggregate.is_host(&host));
        let seat = seat_of(&aggregate, &host);
        aggregate.participants[&seat].removed_at = Some(T0);
        assert!(!aggregate.is_host(&host));
    }
}
