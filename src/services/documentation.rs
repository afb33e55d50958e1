use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quiz room backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::heartbeat,
        crate::routes::rooms::set_ready,
        crate::routes::rooms::start_match,
        crate::routes::rooms::progress,
        crate::routes::rooms::pause,
        crate::routes::rooms::resume,
        crate::routes::rooms::submit_answer,
        crate::routes::rooms::finish,
        crate::routes::rooms::reset_to_lobby,
        crate::routes::rooms::rematch,
        crate::routes::rooms::request_lobby,
        crate::routes::rooms::cancel_pending_action,
        crate::routes::rooms::get_room_state,
        crate::routes::rooms::list_events,
        crate::routes::lobby::get_lobby,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::StoreHealth,
            crate::dto::phase::VisibleRoomStatus,
            crate::dto::phase::VisiblePendingAction,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::RulesInput,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::ParticipantRequest,
            crate::dto::room::SetReadyRequest,
            crate::dto::room::ScheduleActionRequest,
            crate::dto::room::SubmitAnswerRequest,
            crate::dto::room::SeatResponse,
            crate::dto::room::RoomAck,
            crate::dto::room::PendingActionView,
            crate::dto::room::LobbyActionOutcome,
            crate::dto::room::LobbyActionResponse,
            crate::dto::room::AnswerReceipt,
            crate::dto::room::DeckSummary,
            crate::dto::room::RoomEventView,
            crate::dto::projection::RoomStateResponse,
            crate::dto::projection::RoomView,
            crate::dto::projection::RulesView,
            crate::dto::projection::ViewerView,
            crate::dto::projection::ParticipantView,
            crate::dto::projection::RoundView,
            crate::dto::projection::AnswerView,
            crate::dto::projection::LobbyResponse,
            crate::dto::projection::LobbyParticipantView,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Membership, answers and room state"),
        (name = "host", description = "Host-only match controls"),
        (name = "lobby", description = "Public lobby lookup by join code"),
    )
)]
pub struct ApiDoc;
