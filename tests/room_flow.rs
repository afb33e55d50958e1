use std::sync::Arc;

use quiz_room_back::{
    config::AppConfig,
    dao::{
        models::{DeckEntity, QuestionEntity},
        room_store::{RoomStore, memory::MemoryRoomStore},
    },
    dto::{
        phase::VisibleRoomStatus,
        room::{
            CreateRoomRequest, JoinRoomRequest, LobbyActionOutcome, RulesInput,
            ScheduleActionRequest, SeatResponse, SubmitAnswerRequest,
        },
    },
    error::ServiceError,
    services::{projection_service, room_service},
    state::{AppState, SharedState, clock::ManualClock, room::ActorIdentity},
};

const T0: i64 = 1_700_000_000_000;

struct World {
    state: SharedState,
    clock: Arc<ManualClock>,
}

async fn world() -> World {
    let clock = Arc::new(ManualClock::new(T0));
    let state = AppState::with_clock(AppConfig::default(), clock.clone());
    let store = MemoryRoomStore::new();
    let deck = DeckEntity {
        id: "capitals".into(),
        title: "Capitals".into(),
        description: Some("Where is the seat of government?".into()),
    };
    let questions = [("fr", "France"), ("jp", "Japan"), ("ca", "Canada")]
        .into_iter()
        .map(|(id, country)| QuestionEntity {
            id: id.into(),
            deck_id: "capitals".into(),
            prompt: format!("Capital of {country}?"),
            choices: vec!["right".into(), "wrong".into(), "also wrong".into()],
            correct_index: 0,
        })
        .collect();
    store.seed_deck(deck, questions).await.unwrap();
    state.set_room_store(Arc::new(store)).await;
    World { state, clock }
}

fn host() -> ActorIdentity {
    ActorIdentity::User("host-account".into())
}

fn alice() -> ActorIdentity {
    ActorIdentity::Guest("alice-device".into())
}

async fn open(world: &World, owner: ActorIdentity) -> SeatResponse {
    room_service::create_room(
        &world.state,
        owner,
        CreateRoomRequest {
            deck_id: Some("capitals".into()),
            nickname: Some("Quizmaster".into()),
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

async fn enter(world: &World, seat: &SeatResponse, who: ActorIdentity) -> SeatResponse {
    room_service::join_room(
        &world.state,
        who,
        JoinRoomRequest {
            code: seat.code.clone(),
            nickname: None,
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn full_match_from_lobby_to_rematch() {
    let world = world().await;
    let state = &world.state;
    let seat = open(&world, host()).await;
    let room_id = seat.room_id;
    let alice_seat = enter(&world, &seat, alice()).await;

    let lobby = projection_service::get_lobby(state, &seat.code.to_lowercase())
        .await
        .unwrap();
    assert_eq!(lobby.participants.len(), 2);
    assert_eq!(lobby.status, VisibleRoomStatus::Lobby);

    room_service::set_ready(state, alice(), room_id, alice_seat.participant_id, true)
        .await
        .unwrap();
    let scheduled =
        room_service::start_match(state, host(), room_id, ScheduleActionRequest::default())
            .await
            .unwrap();
    assert_eq!(scheduled.outcome, LobbyActionOutcome::Scheduled);

    // Nothing runs until someone touches the room after the deadline.
    world.clock.advance(3_000);
    let ack = room_service::heartbeat(state, alice(), room_id, alice_seat.participant_id)
        .await
        .unwrap();
    assert_eq!(ack.status, VisibleRoomStatus::Countdown);

    let view = projection_service::get_room_state(state, alice(), room_id)
        .await
        .unwrap();
    assert_eq!(view.room.total_rounds, 2);
    let round = view.current_round.unwrap();
    assert!(round.prompt.is_none());
    assert!(round.choices.is_empty());

    let ack = room_service::progress(state, host(), room_id).await.unwrap();
    assert_eq!(ack.status, VisibleRoomStatus::Question);
    let question_ends_at = ack.phase_ends_at.unwrap();

    world.clock.advance(1_000);
    let receipt = room_service::submit_answer(
        state,
        alice(),
        room_id,
        SubmitAnswerRequest {
            participant_id: alice_seat.participant_id,
            choice_index: 0,
            client_ts: None,
        },
    )
    .await
    .unwrap();
    assert!(receipt.accepted);
    assert_eq!(receipt.elapsed_ms, 1_000);

    let host_view = projection_service::get_room_state(state, host(), room_id)
        .await
        .unwrap();
    let round = host_view.current_round.unwrap();
    assert_eq!(round.answered_count, 1);
    assert!(round.answers.is_empty());
    assert!(round.correct_index.is_none());

    let alice_view = projection_service::get_room_state(state, alice(), room_id)
        .await
        .unwrap();
    let mine = alice_view.current_round.unwrap().my_answer.unwrap();
    assert_eq!(mine.is_correct, None);

    let paused = room_service::pause(state, host(), room_id).await.unwrap();
    assert_eq!(paused.status, VisibleRoomStatus::Paused);
    world.clock.advance(5_000);
    let resumed = room_service::resume(state, host(), room_id).await.unwrap();
    assert_eq!(resumed.status, VisibleRoomStatus::Question);
    assert_eq!(resumed.phase_ends_at, Some(question_ends_at + 5_000));

    for expected in [VisibleRoomStatus::Grace, VisibleRoomStatus::Reveal] {
        let ack = room_service::progress(state, host(), room_id).await.unwrap();
        assert_eq!(ack.status, expected);
    }

    let revealed = projection_service::get_room_state(state, host(), room_id)
        .await
        .unwrap();
    let round = revealed.current_round.unwrap();
    assert_eq!(round.correct_index, Some(0));
    assert_eq!(round.answers.len(), 1);
    assert_eq!(round.answers[0].score_delta, Some(145));
    assert_eq!(revealed.participants[0].id, alice_seat.participant_id);
    assert_eq!(revealed.participants[0].rank, 1);
    assert_eq!(revealed.participants[1].rank, 2);
    assert_eq!(revealed.me.unwrap().rank, Some(2));

    let ack = room_service::progress(state, host(), room_id).await.unwrap();
    assert_eq!(ack.status, VisibleRoomStatus::Leaderboard);
    let ack = room_service::progress(state, host(), room_id).await.unwrap();
    assert_eq!(ack.status, VisibleRoomStatus::Countdown);
    assert_eq!(ack.current_round, 1);

    let ack = room_service::finish(state, host(), room_id).await.unwrap();
    assert_eq!(ack.status, VisibleRoomStatus::Results);

    let asked = room_service::rematch(state, alice(), room_id, ScheduleActionRequest::default())
        .await
        .unwrap();
    assert_eq!(asked.outcome, LobbyActionOutcome::Requested);
    assert!(asked.pending_action.is_none());

    let events = room_service::list_events(state, host(), room_id).await.unwrap();
    assert!(events.iter().any(|event| event.kind == "lobby_request"));

    room_service::rematch(
        state,
        host(),
        room_id,
        ScheduleActionRequest {
            delay_ms: Some(5_000),
            label: Some("Round two".into()),
        },
    )
    .await
    .unwrap();
    world.clock.advance(5_000);
    let ack = room_service::heartbeat(state, host(), room_id, seat.participant_id)
        .await
        .unwrap();
    assert_eq!(ack.status, VisibleRoomStatus::Countdown);
    assert_eq!(ack.current_round, 0);

    let fresh = projection_service::get_room_state(state, alice(), room_id)
        .await
        .unwrap();
    assert!(fresh.participants.iter().all(|p| p.total_score == 0));
}

#[tokio::test]
async fn results_return_to_lobby_clear_readiness() {
    let world = world().await;
    let state = &world.state;
    let seat = open(&world, host()).await;
    let room_id = seat.room_id;
    let alice_seat = enter(&world, &seat, alice()).await;

    room_service::set_ready(state, alice(), room_id, alice_seat.participant_id, true)
        .await
        .unwrap();
    room_service::start_match(state, host(), room_id, ScheduleActionRequest::default())
        .await
        .unwrap();
    world.clock.advance(3_000);
    room_service::finish(state, host(), room_id).await.unwrap();

    room_service::request_lobby(state, host(), room_id, ScheduleActionRequest::default())
        .await
        .unwrap();
    let cancelled = room_service::cancel_pending_action(state, host(), room_id).await;
    assert!(cancelled.is_ok());

    room_service::reset_to_lobby(state, host(), room_id, ScheduleActionRequest::default())
        .await
        .unwrap();
    world.clock.advance(3_000);
    let ack = room_service::heartbeat(state, alice(), room_id, alice_seat.participant_id)
        .await
        .unwrap();
    assert_eq!(ack.status, VisibleRoomStatus::Lobby);

    let view = projection_service::get_room_state(state, alice(), room_id)
        .await
        .unwrap();
    assert!(view.participants.iter().all(|p| !p.is_ready));
    assert!(view.current_round.is_none());
}

#[tokio::test]
async fn silent_host_hands_over_to_durable_participant() {
    let world = world().await;
    let state = &world.state;
    let guest_host = ActorIdentity::Guest("first-device".into());
    let account = ActorIdentity::User("account-7".into());
    let seat = open(&world, guest_host.clone()).await;
    let room_id = seat.room_id;
    let other = enter(&world, &seat, alice()).await;
    let durable = enter(&world, &seat, account.clone()).await;

    world.clock.advance(60_000);
    room_service::heartbeat(state, alice(), room_id, other.participant_id)
        .await
        .unwrap();
    room_service::heartbeat(state, account.clone(), room_id, durable.participant_id)
        .await
        .unwrap();

    world.clock.advance(61_000);
    room_service::heartbeat(state, alice(), room_id, other.participant_id)
        .await
        .unwrap();

    let view = projection_service::get_room_state(state, account.clone(), room_id)
        .await
        .unwrap();
    assert!(view.me.unwrap().is_host);
    assert_eq!(view.participants.len(), 2);

    let former = projection_service::get_room_state(state, guest_host.clone(), room_id)
        .await
        .unwrap();
    assert!(former.me.is_none());

    let result = room_service::heartbeat(state, guest_host, room_id, seat.participant_id).await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn strangers_cannot_read_room_state() {
    let world = world().await;
    let seat = open(&world, host()).await;

    let result = projection_service::get_room_state(
        &world.state,
        ActorIdentity::Guest("nobody".into()),
        seat.room_id,
    )
    .await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn pause_does_not_cost_answer_time() {
    let world = world().await;
    let state = &world.state;
    let seat = open(&world, host()).await;
    let room_id = seat.room_id;

    room_service::start_match(state, host(), room_id, ScheduleActionRequest::default())
        .await
        .unwrap();
    world.clock.advance(3_000);
    let ack = room_service::progress(state, host(), room_id).await.unwrap();
    assert_eq!(ack.status, VisibleRoomStatus::Question);

    world.clock.advance(1_000);
    room_service::pause(state, host(), room_id).await.unwrap();
    world.clock.advance(5_000);
    room_service::resume(state, host(), room_id).await.unwrap();
    world.clock.advance(1_000);

    let receipt = room_service::submit_answer(
        state,
        host(),
        room_id,
        SubmitAnswerRequest {
            participant_id: seat.participant_id,
            choice_index: 0,
            client_ts: None,
        },
    )
    .await
    .unwrap();
    assert!(receipt.accepted);
    assert_eq!(receipt.elapsed_ms, 2_000);

    for _ in 0..2 {
        room_service::progress(state, host(), room_id).await.unwrap();
    }
    let view = projection_service::get_room_state(state, host(), room_id)
        .await
        .unwrap();
    let round = view.current_round.unwrap();
    assert_eq!(round.answers[0].score_delta, Some(140));
    assert_eq!(view.me.unwrap().total_score, 140);
}
