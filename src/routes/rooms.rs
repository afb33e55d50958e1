use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        projection::RoomStateResponse,
        room::{
            AnswerReceipt, CreateRoomRequest, JoinRoomRequest, LobbyActionResponse,
            ParticipantRequest, RoomAck, RoomEventView, ScheduleActionRequest, SeatResponse,
            SetReadyRequest, SubmitAnswerRequest,
        },
    },
    error::AppError,
    routes::identity::Actor,
    services::{projection_service, room_service},
    state::SharedState,
};

/// Room lifecycle and in-match endpoints. Every route requires an identity header.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/join", post(join_room))
        .route("/rooms/{room_id}/leave", post(leave_room))
        .route("/rooms/{room_id}/heartbeat", post(heartbeat))
        .route("/rooms/{room_id}/ready", post(set_ready))
        .route("/rooms/{room_id}/start", post(start_match))
        .route("/rooms/{room_id}/progress", post(progress))
        .route("/rooms/{room_id}/pause", post(pause))
        .route("/rooms/{room_id}/resume", post(resume))
        .route("/rooms/{room_id}/answers", post(submit_answer))
        .route("/rooms/{room_id}/finish", post(finish))
        .route("/rooms/{room_id}/reset", post(reset_to_lobby))
        .route("/rooms/{room_id}/rematch", post(rematch))
        .route("/rooms/{room_id}/request-lobby", post(request_lobby))
        .route("/rooms/{room_id}/pending-action", delete(cancel_pending_action))
        .route("/rooms/{room_id}/state", get(get_room_state))
        .route("/rooms/{room_id}/events", get(list_events))
}

/// Open a room in the lobby with the caller as host.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    params(
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = SeatResponse),
        (status = 404, description = "Unknown deck")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<Json<SeatResponse>, AppError> {
    Ok(Json(room_service::create_room(&state, actor, payload).await?))
}

/// Take a seat by join code.
#[utoipa::path(
    post,
    path = "/rooms/join",
    tag = "rooms",
    params(
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Seat taken or already held", body = SeatResponse),
        (status = 404, description = "Match not available"),
        (status = 409, description = "Room full, or rejoin during a match")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Valid(Json(payload)): Valid<Json<JoinRoomRequest>>,
) -> Result<Json<SeatResponse>, AppError> {
    Ok(Json(room_service::join_room(&state, actor, payload).await?))
}

/// Give up the caller's seat.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/leave",
    tag = "rooms",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = ParticipantRequest,
    responses((status = 200, description = "Seat released", body = RoomAck))
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ParticipantRequest>>,
) -> Result<Json<RoomAck>, AppError> {
    Ok(Json(
        room_service::leave_room(&state, actor, room_id, payload.participant_id).await?,
    ))
}

/// Keep the caller's seat alive.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/heartbeat",
    tag = "rooms",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = ParticipantRequest,
    responses(
        (status = 200, description = "Liveness refreshed", body = RoomAck),
        (status = 409, description = "Participant was removed")
    )
)]
pub async fn heartbeat(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ParticipantRequest>>,
) -> Result<Json<RoomAck>, AppError> {
    Ok(Json(
        room_service::heartbeat(&state, actor, room_id, payload.participant_id).await?,
    ))
}

/// Toggle lobby readiness.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/ready",
    tag = "rooms",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = SetReadyRequest,
    responses((status = 200, description = "Readiness updated", body = RoomAck))
)]
pub async fn set_ready(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SetReadyRequest>>,
) -> Result<Json<RoomAck>, AppError> {
    Ok(Json(
        room_service::set_ready(&state, actor, room_id, payload.participant_id, payload.ready)
            .await?,
    ))
}

/// Schedule the match start (host only).
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/start",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = ScheduleActionRequest,
    responses(
        (status = 200, description = "Start scheduled", body = LobbyActionResponse),
        (status = 409, description = "Not ready, wrong status or ACTION_PENDING")
    )
)]
pub async fn start_match(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ScheduleActionRequest>>,
) -> Result<Json<LobbyActionResponse>, AppError> {
    Ok(Json(
        room_service::start_match(&state, actor, room_id, payload).await?,
    ))
}

/// Advance one phase (host only).
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/progress",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    responses((status = 200, description = "Phase advanced", body = RoomAck))
)]
pub async fn progress(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomAck>, AppError> {
    Ok(Json(room_service::progress(&state, actor, room_id).await?))
}

/// Freeze the running phase (host only).
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/pause",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    responses((status = 200, description = "Room paused", body = RoomAck))
)]
pub async fn pause(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomAck>, AppError> {
    Ok(Json(room_service::pause(&state, actor, room_id).await?))
}

/// Resume the paused phase (host only).
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/resume",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    responses((status = 200, description = "Room resumed", body = RoomAck))
)]
pub async fn resume(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomAck>, AppError> {
    Ok(Json(room_service::resume(&state, actor, room_id).await?))
}

/// Answer the current round.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/answers",
    tag = "rooms",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer stored, or the earlier answer acknowledged", body = AnswerReceipt),
        (status = 409, description = "Answers are closed")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<AnswerReceipt>, AppError> {
    Ok(Json(
        room_service::submit_answer(&state, actor, room_id, payload).await?,
    ))
}

/// Jump to the final standings (host only).
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/finish",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    responses((status = 200, description = "Match finished", body = RoomAck))
)]
pub async fn finish(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomAck>, AppError> {
    Ok(Json(room_service::finish(&state, actor, room_id).await?))
}

/// Schedule a return to the lobby; non-hosts only leave a request.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/reset",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = ScheduleActionRequest,
    responses((status = 200, description = "Scheduled or requested", body = LobbyActionResponse))
)]
pub async fn reset_to_lobby(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ScheduleActionRequest>>,
) -> Result<Json<LobbyActionResponse>, AppError> {
    Ok(Json(
        room_service::reset_to_lobby(&state, actor, room_id, payload).await?,
    ))
}

/// Schedule a rematch; non-hosts only leave a request.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/rematch",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = ScheduleActionRequest,
    responses((status = 200, description = "Scheduled or requested", body = LobbyActionResponse))
)]
pub async fn rematch(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ScheduleActionRequest>>,
) -> Result<Json<LobbyActionResponse>, AppError> {
    Ok(Json(room_service::rematch(&state, actor, room_id, payload).await?))
}

/// Ask for a return to the lobby.
#[utoipa::path(
    post,
    path = "/rooms/{room_id}/request-lobby",
    tag = "rooms",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    request_body = ScheduleActionRequest,
    responses((status = 200, description = "Scheduled or requested", body = LobbyActionResponse))
)]
pub async fn request_lobby(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ScheduleActionRequest>>,
) -> Result<Json<LobbyActionResponse>, AppError> {
    Ok(Json(
        room_service::request_lobby(&state, actor, room_id, payload).await?,
    ))
}

/// Cancel the pending action (host only).
#[utoipa::path(
    delete,
    path = "/rooms/{room_id}/pending-action",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    responses(
        (status = 200, description = "Pending action cancelled", body = RoomAck),
        (status = 409, description = "Nothing pending")
    )
)]
pub async fn cancel_pending_action(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomAck>, AppError> {
    Ok(Json(
        room_service::cancel_pending_action(&state, actor, room_id).await?,
    ))
}

/// Room state as seen by the caller.
#[utoipa::path(
    get,
    path = "/rooms/{room_id}/state",
    tag = "rooms",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    responses(
        (status = 200, description = "Projected room state", body = RoomStateResponse),
        (status = 404, description = "Match not available")
    )
)]
pub async fn get_room_state(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomStateResponse>, AppError> {
    Ok(Json(
        projection_service::get_room_state(&state, actor, room_id).await?,
    ))
}

/// Audit log of the room (host only).
#[utoipa::path(
    get,
    path = "/rooms/{room_id}/events",
    tag = "host",
    params(
        ("room_id" = Uuid, Path, description = "Room identifier"),
        ("x-user-id" = Option<String>, Header, description = "Authenticated account id"),
        ("x-guest-key" = Option<String>, Header, description = "Guest key when no account id is sent")
    ),
    responses((status = 200, description = "Events in chronological order", body = [RoomEventView]))
)]
pub async fn list_events(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Vec<RoomEventView>>, AppError> {
    Ok(Json(room_service::list_events(&state, actor, room_id).await?))
}
