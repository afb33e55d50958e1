use thiserror::Error;

use crate::state::room::{PauseState, Room, RoomDraft, RoomStatus};

/// Events that can be applied to a room's phase state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Scheduled start or rematch begins the first round.
    BeginMatch,
    /// Host advances one step.
    Progress,
    /// Host freezes the current timed phase.
    Pause,
    /// Host unfreezes the paused phase.
    Resume,
    /// Host force-jumps to the final standings.
    Finish,
    /// Scheduled return from the results screen to the lobby.
    ReturnToLobby,
    /// Every participant left; the room falls back to the lobby from anywhere.
    Abandon,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from}")]
pub struct InvalidTransition {
    /// The status the room was in when the invalid event was received.
    pub from: RoomStatus,
    /// The event that cannot be applied from this status.
    pub event: PhaseEvent,
}

/// Compute the status an event leads to, without touching the room.
pub fn compute_transition(room: &Room, event: PhaseEvent) -> Result<RoomStatus, InvalidTransition> {
    let next = match (room.status, event) {
        (_, PhaseEvent::Abandon) => RoomStatus::Lobby,
        (RoomStatus::Lobby | RoomStatus::Results, PhaseEvent::BeginMatch) => RoomStatus::Countdown,
        (RoomStatus::Countdown, PhaseEvent::Progress) => RoomStatus::Question,
        (RoomStatus::Question, PhaseEvent::Progress) => RoomStatus::Grace,
        (RoomStatus::Grace, PhaseEvent::Progress) => RoomStatus::Reveal,
        (RoomStatus::Reveal, PhaseEvent::Progress) => RoomStatus::Leaderboard,
        (RoomStatus::Leaderboard, PhaseEvent::Progress) => {
            if room.current_round + 1 < room.total_rounds {
                RoomStatus::Countdown
            } else {
                RoomStatus::Results
            }
        }
        (status, PhaseEvent::Pause) if status.is_pausable() => RoomStatus::Paused,
        (RoomStatus::Paused, PhaseEvent::Resume) => match room.pause_state {
            Some(pause) => pause.previous_status,
            None => {
                return Err(InvalidTransition {
                    from: room.status,
                    event,
                });
            }
        },
        (status, PhaseEvent::Finish) if status.is_pausable() || status == RoomStatus::Paused => {
            RoomStatus::Results
        }
        (RoomStatus::Results, PhaseEvent::ReturnToLobby) => RoomStatus::Lobby,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

/// Apply an event to the draft, including the timing and round bookkeeping
/// that each transition owns. Returns the new status.
///
/// `pause_state` is only ever set or cleared here, keeping it coupled to
/// `RoomStatus::Paused`.
pub fn apply_transition(
    draft: &mut RoomDraft,
    event: PhaseEvent,
) -> Result<RoomStatus, InvalidTransition> {
    let from = draft.room().status;
    let next = compute_transition(draft.room(), event)?;
    let now = draft.now;

    match event {
        PhaseEvent::Pause => {
            let room = draft.room_mut();
            let remaining_ms = room
                .phase_ends_at
                .map(|ends_at| (ends_at - now).max(0))
                .unwrap_or(0);
            room.pause_state = Some(PauseState {
                previous_status: from,
                remaining_ms,
                paused_at: now,
            });
            room.status = RoomStatus::Paused;
            room.phase_ends_at = None;
            return Ok(next);
        }
        PhaseEvent::Resume => {
            let Some(pause) = draft.room_mut().pause_state.take() else {
                return Err(InvalidTransition { from, event });
            };
            if next == RoomStatus::Question {
                let paused_for = now - pause.paused_at;
                if let Some(round) = draft.aggregate.current_round_mut() {
                    if round.started_at > 0 {
                        round.started_at += paused_for;
                    }
                }
            }
            let room = draft.room_mut();
            room.status = next;
            room.phase_ends_at = Some(now + pause.remaining_ms);
            return Ok(next);
        }
        PhaseEvent::BeginMatch => {
            draft.room_mut().current_round = 0;
        }
        PhaseEvent::Progress if from == RoomStatus::Leaderboard && next == RoomStatus::Countdown => {
            draft.room_mut().current_round += 1;
        }
        _ => {}
    }

    draft.room_mut().pause_state = None;
    enter_status(draft, next);
    Ok(next)
}

/// Move into `status`, re-anchoring the phase deadline and stamping the round.
fn enter_status(draft: &mut RoomDraft, status: RoomStatus) {
    let now = draft.now;
    match status {
        RoomStatus::Question => {
            if let Some(round) = draft.aggregate.current_round_mut() {
                round.started_at = now;
            }
        }
        RoomStatus::Grace => {
            if let Some(round) = draft.aggregate.current_round_mut() {
                round.closed_at = Some(now);
            }
        }
        RoomStatus::Reveal => {
            if let Some(round) = draft.aggregate.current_round_mut() {
                round.closed_at.get_or_insert(now);
                round.reveal_at = Some(now);
            }
        }
        _ => {}
    }

    let room = draft.room_mut();
    room.status = status;
    room.server_now = now;
    room.phase_ends_at = room.rules.phase_budget_ms(status).map(|budget| now + budget);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::fixtures::*;

    fn running_draft(now: i64) -> RoomDraft {
        let mut aggregate = aggregate(guest("h"), &[guest("p")]);
        aggregate.rounds = rounds(2);
        aggregate.room.total_rounds = 2;
        RoomDraft::begin(aggregate, now)
    }

    fn apply(draft: &mut RoomDraft, event: PhaseEvent) -> RoomStatus {
        apply_transition(draft, event).unwrap()
    }

    #[test]
    fn full_happy_path_through_match() {
        let mut draft = running_draft(T0);

        assert_eq!(apply(&mut draft, PhaseEvent::BeginMatch), RoomStatus::Countdown);
        assert_eq!(draft.room().phase_ends_at, Some(T0 + 3_000));
        assert_eq!(apply(&mut draft, PhaseEvent::Progress), RoomStatus::Question);
        assert_eq!(draft.aggregate.rounds[0].started_at, T0);
        assert_eq!(apply(&mut draft, PhaseEvent::Progress), RoomStatus::Grace);
        assert_eq!(apply(&mut draft, PhaseEvent::Progress), RoomStatus::Reveal);
        assert_eq!(draft.aggregate.rounds[0].reveal_at, Some(T0));
        assert_eq!(apply(&mut draft, PhaseEvent::Progress), RoomStatus::Leaderboard);

        assert_eq!(apply(&mut draft, PhaseEvent::Progress), RoomStatus::Countdown);
        assert_eq!(draft.room().current_round, 1);

        for expected in [
            RoomStatus::Question,
            RoomStatus::Grace,
            RoomStatus::Reveal,
            RoomStatus::Leaderboard,
            RoomStatus::Results,
        ] {
            assert_eq!(apply(&mut draft, PhaseEvent::Progress), expected);
        }
        assert_eq!(draft.room().current_round, 1);
        assert_eq!(draft.room().phase_ends_at, None);

        assert_eq!(apply(&mut draft, PhaseEvent::ReturnToLobby), RoomStatus::Lobby);
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut draft = running_draft(T0);
        let err = apply_transition(&mut draft, PhaseEvent::Progress).unwrap_err();
        assert_eq!(err.from, RoomStatus::Lobby);
        assert_eq!(err.event, PhaseEvent::Progress);

        let err = apply_transition(&mut draft, PhaseEvent::Pause).unwrap_err();
        assert_eq!(err.from, RoomStatus::Lobby);
    }

    #[test]
    fn results_are_not_progressable() {
        let mut draft = running_draft(T0);
        apply(&mut draft, PhaseEvent::BeginMatch);
        apply(&mut draft, PhaseEvent::Finish);
        assert!(apply_transition(&mut draft, PhaseEvent::Progress).is_err());
    }

    #[test]
    fn pause_snapshots_remaining_time_and_resume_restores_it() {
        let mut draft = running_draft(T0);
        apply(&mut draft, PhaseEvent::BeginMatch);
        apply(&mut draft, PhaseEvent::Progress);

        draft.now = T0 + 4_000;
        apply(&mut draft, PhaseEvent::Pause);
        assert_eq!(draft.room().status, RoomStatus::Paused);
        assert_eq!(draft.room().phase_ends_at, None);
        let pause = draft.room().pause_state.unwrap();
        assert_eq!(pause.previous_status, RoomStatus::Question);
        assert_eq!(pause.remaining_ms, 6_000);

        draft.now = T0 + 64_000;
        assert_eq!(apply(&mut draft, PhaseEvent::Resume), RoomStatus::Question);
        assert!(draft.room().pause_state.is_none());
        assert_eq!(draft.room().phase_ends_at, Some(T0 + 70_000));
        // Four seconds had elapsed before the pause; they still have.
        assert_eq!(draft.now - draft.aggregate.rounds[0].started_at, 4_000);
    }

    #[test]
    fn pause_of_expired_phase_keeps_zero_remaining() {
        let mut draft = running_draft(T0);
        apply(&mut draft, PhaseEvent::BeginMatch);
        draft.now = T0 + 10_000;
        apply(&mut draft, PhaseEvent::Pause);
        assert_eq!(draft.room().pause_state.unwrap().remaining_ms, 0);
    }

    #[test]
    fn finish_from_pause_clears_snapshot() {
        let mut draft = running_draft(T0);
        apply(&mut draft, PhaseEvent::BeginMatch);
        apply(&mut draft, PhaseEvent::Pause);
        assert_eq!(apply(&mut draft, PhaseEvent::Finish), RoomStatus::Results);
        assert!(draft.room().pause_state.is_none());
    }

    #[test]
    fn abandon_resets_from_anywhere() {
        let mut draft = running_draft(T0);
        apply(&mut draft, PhaseEvent::BeginMatch);
        apply(&mut draft, PhaseEvent::Pause);
        assert_eq!(apply(&mut draft, PhaseEvent::Abandon), RoomStatus::Lobby);
        assert!(draft.room().pause_state.is_none());
        assert_eq!(draft.room().phase_ends_at, None);
    }
}
