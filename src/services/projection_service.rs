//! Read-only projections. Nothing here mutates the room: the stored state is
//! shown as-is, with liveness evaluated against the current time.

use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::QuestionEntity,
    dto::{
        projection::{
            AnswerView, LobbyParticipantView, LobbyResponse, ParticipantView, RoomStateResponse,
            RoomView, RoundView, RulesView, ViewerView,
        },
        room::{DeckSummary, PendingActionView},
    },
    error::ServiceError,
    state::{
        SharedState, join_code,
        room::{ActorIdentity, Answer, RoomAggregate, RoomStatus, Rules},
        scoring::rank_participants,
    },
};

/// Room state as seen by `actor`, who must hold (or have held) a seat.
///
/// Before the reveal a viewer only ever sees their own answer; the prompt stays
/// hidden during the countdown.
pub async fn get_room_state(
    state: &SharedState,
    actor: ActorIdentity,
    room_id: Uuid,
) -> Result<RoomStateResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let aggregate = state.load_room(room_id).await?;
    let viewer = aggregate
        .participant_by_identity(&actor)
        .ok_or_else(ServiceError::room_unavailable)?;
    let viewer_id = viewer.id;
    let viewer_active = viewer.is_active();

    let now = state.now_ms();
    let connected_timeout_ms = state.config().connected_timeout_ms;

    let deck = store
        .find_deck(aggregate.room.deck_id.clone())
        .await?
        .map(|deck| DeckSummary {
            id: deck.id,
            title: deck.title,
            description: deck.description,
        });

    let question = match aggregate.current_round() {
        Some(round) if aggregate.room.status != RoomStatus::Lobby => {
            let question = store
                .find_question(aggregate.room.deck_id.clone(), round.question_id.clone())
                .await?;
            if question.is_none() {
                warn!(room_id = %room_id, question_id = %round.question_id, "round question missing from deck");
            }
            question
        }
        _ => None,
    };

    let standings = rank_participants(aggregate.active_participants());
    let participants = standings
        .iter()
        .map(|standing| {
            let participant = standing.participant;
            ParticipantView {
                id: participant.id,
                nickname: participant.nickname.clone(),
                is_host: participant.is_host,
                is_ready: participant.is_ready,
                is_connected: participant.is_connected(now, connected_timeout_ms),
                total_score: participant.total_score,
                answers: participant.answers,
                avg_response_ms: participant.avg_response_ms,
                rank: standing.rank,
            }
        })
        .collect();

    let me = viewer_active.then(|| {
        let participant = &aggregate.participants[&viewer_id];
        ViewerView {
            participant_id: viewer_id,
            is_host: participant.is_host,
            is_ready: participant.is_ready,
            total_score: participant.total_score,
            rank: standings
                .iter()
                .find(|standing| standing.participant.id == viewer_id)
                .map(|standing| standing.rank),
        }
    });

    let current_round = round_view(&aggregate, question.as_ref(), viewer_id);

    Ok(RoomStateResponse {
        room: room_view(&aggregate, now, state.config().max_participants),
        deck,
        me,
        participants,
        current_round,
    })
}

/// Pre-match lobby by join code; no identity required.
pub async fn get_lobby(state: &SharedState, code: &str) -> Result<LobbyResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let code = join_code::normalize(code);
    let room_id = store
        .find_room_id_by_code(code)
        .await?
        .ok_or_else(ServiceError::room_unavailable)?;
    let aggregate = state.load_room(room_id).await?;

    let now = state.now_ms();
    let connected_timeout_ms = state.config().connected_timeout_ms;
    let deck = store
        .find_deck(aggregate.room.deck_id.clone())
        .await?
        .map(|deck| DeckSummary {
            id: deck.id,
            title: deck.title,
            description: deck.description,
        });

    let room = &aggregate.room;
    Ok(LobbyResponse {
        room_id: room.id,
        code: room.code.clone(),
        status: room.status.into(),
        deck,
        participants: aggregate
            .active_participants()
            .map(|participant| LobbyParticipantView {
                nickname: participant.nickname.clone(),
                is_host: participant.is_host,
                is_ready: participant.is_ready,
                is_connected: participant.is_connected(now, connected_timeout_ms),
            })
            .collect(),
        capacity: state.config().max_participants,
        pending_action: room.pending_action.as_ref().map(PendingActionView::from),
        server_now: now,
    })
}

fn room_view(aggregate: &RoomAggregate, now: i64, capacity: usize) -> RoomView {
    let room = &aggregate.room;
    RoomView {
        id: room.id,
        code: room.code.clone(),
        status: room.status.into(),
        paused_status: room.pause_state.map(|pause| pause.previous_status.into()),
        paused_remaining_ms: room.pause_state.map(|pause| pause.remaining_ms),
        current_round: room.current_round,
        total_rounds: room.total_rounds,
        server_now: now,
        phase_ends_at: room.phase_ends_at,
        pending_action: room.pending_action.as_ref().map(PendingActionView::from),
        rules: rules_view(&room.rules),
        capacity,
        version: room.version,
    }
}

fn rules_view(rules: &Rules) -> RulesView {
    RulesView {
        rounds: rules.rounds,
        read_seconds: rules.read_seconds,
        answer_seconds: rules.answer_seconds,
        grace_seconds: rules.grace_seconds,
        reveal_seconds: rules.reveal_seconds,
        leaderboard_seconds: rules.leaderboard_seconds,
    }
}

fn round_view(
    aggregate: &RoomAggregate,
    question: Option<&QuestionEntity>,
    viewer_id: Uuid,
) -> Option<RoundView> {
    if aggregate.room.status == RoomStatus::Lobby {
        return None;
    }
    let round = aggregate.current_round()?;
    let status = aggregate.effective_status();
    let revealed = status.is_revealed();
    let shows_question = status != RoomStatus::Countdown;

    let round_answers: Vec<&Answer> = aggregate
        .answers
        .iter()
        .filter(|answer| answer.round_index == round.index)
        .collect();
    let answer_view = |answer: &Answer| AnswerView {
        participant_id: answer.participant_id,
        choice_index: answer.choice_index,
        elapsed_ms: answer.elapsed_ms,
        is_correct: revealed.then_some(answer.is_correct),
        score_delta: revealed.then_some(answer.score_delta),
    };

    Some(RoundView {
        index: round.index,
        question_id: round.question_id.clone(),
        prompt: question
            .filter(|_| shows_question)
            .map(|question| question.prompt.clone()),
        choices: question
            .filter(|_| shows_question)
            .map(|question| question.choices.clone())
            .unwrap_or_default(),
        started_at: (round.started_at > 0).then_some(round.started_at),
        closed_at: round.closed_at,
        reveal_at: round.reveal_at,
        correct_index: question
            .filter(|_| revealed)
            .map(|question| question.correct_index),
        answered_count: round_answers.len(),
        my_answer: round_answers
            .iter()
            .find(|answer| answer.participant_id == viewer_id)
            .map(|answer| answer_view(*answer)),
        answers: if revealed {
            round_answers.iter().map(|answer| answer_view(*answer)).collect()
        } else {
            Vec::new()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::{Participant, fixtures::*};

    fn question() -> QuestionEntity {
        QuestionEntity {
            id: "q0".into(),
            deck_id: "deck".into(),
            prompt: "Pick b".into(),
            choices: vec!["a".into(), "b".into()],
            correct_index: 1,
        }
    }

    fn answered_room(status: RoomStatus) -> (RoomAggregate, Uuid, Uuid) {
        let host = guest("h");
        let player = guest("p");
        let mut aggregate = aggregate(host.clone(), &[player.clone()]);
        aggregate.rounds = rounds(1);
        aggregate.room.total_rounds = 1;
        aggregate.room.status = status;
        let host_seat = seat_of(&aggregate, &host);
        let player_seat = seat_of(&aggregate, &player);
        for (seat, choice) in [(host_seat, 1), (player_seat, 0)] {
            aggregate.answers.push(Answer {
                participant_id: seat,
                round_index: 0,
                choice_index: choice,
                client_ts: None,
                received_at: T0 + 1_000,
                elapsed_ms: 1_000,
                is_correct: choice == 1,
                score_delta: if choice == 1 { 145 } else { 0 },
            });
        }
        (aggregate, host_seat, player_seat)
    }

    #[test]
    fn countdown_hides_the_prompt() {
        let (aggregate, host_seat, _) = answered_room(RoomStatus::Countdown);
        let view = round_view(&aggregate, Some(&question()), host_seat).unwrap();
        assert!(view.prompt.is_none());
        assert!(view.choices.is_empty());
        assert!(view.correct_index.is_none());
    }

    #[test]
    fn open_question_shows_only_own_answer() {
        let (aggregate, host_seat, _) = answered_room(RoomStatus::Question);
        let view = round_view(&aggregate, Some(&question()), host_seat).unwrap();
        assert_eq!(view.prompt.as_deref(), Some("Pick b"));
        assert_eq!(view.answered_count, 2);
        assert!(view.answers.is_empty());
        assert!(view.correct_index.is_none());
        let mine = view.my_answer.unwrap();
        assert_eq!(mine.participant_id, host_seat);
        assert!(mine.is_correct.is_none());
    }

    #[test]
    fn reveal_shows_everything() {
        let (aggregate, _, player_seat) = answered_room(RoomStatus::Reveal);
        let view = round_view(&aggregate, Some(&question()), player_seat).unwrap();
        assert_eq!(view.correct_index, Some(1));
        assert_eq!(view.answers.len(), 2);
        assert_eq!(view.my_answer.unwrap().is_correct, Some(false));
    }

    #[test]
    fn paused_question_redacts_like_the_frozen_phase() {
        let (mut aggregate, host_seat, _) = answered_room(RoomStatus::Paused);
        aggregate.room.pause_state = Some(crate::state::room::PauseState {
            previous_status: RoomStatus::Question,
            remaining_ms: 4_000,
            paused_at: T0,
        });
        let view = round_view(&aggregate, Some(&question()), host_seat).unwrap();
        assert!(view.answers.is_empty());
        assert!(view.prompt.is_some());

        let room = room_view(&aggregate, T0 + 10, 10);
        assert_eq!(room.paused_remaining_ms, Some(4_000));
        assert_eq!(room.server_now, T0 + 10);
    }

    #[test]
    fn lobby_has_no_round() {
        let (mut aggregate, host_seat, _) = answered_room(RoomStatus::Lobby);
        aggregate
            .participants
            .insert(Uuid::new_v4(), Participant::new(guest("x"), "x".into(), T0));
        assert!(round_view(&aggregate, Some(&question()), host_seat).is_none());
    }
}
