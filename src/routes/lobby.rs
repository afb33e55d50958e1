use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::projection::LobbyResponse, error::AppError, services::projection_service,
    state::SharedState,
};

/// Public lobby lookup; no identity header needed.
pub fn router() -> Router<SharedState> {
    Router::new().route("/lobby/{code}", get(get_lobby))
}

/// Pre-match view of a room by join code.
#[utoipa::path(
    get,
    path = "/lobby/{code}",
    tag = "lobby",
    params(("code" = String, Path, description = "Join code, case-insensitive")),
    responses(
        (status = 200, description = "Lobby view", body = LobbyResponse),
        (status = 404, description = "Match not available")
    )
)]
pub async fn get_lobby(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<LobbyResponse>, AppError> {
    Ok(Json(projection_service::get_lobby(&state, &code).await?))
}
