use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

pub mod health;
pub mod identity;
pub mod lobby;
pub mod rooms;

/// Compose the room, lobby and health trees with the Swagger UI at `/docs`.
pub fn router(state: SharedState) -> Router<()> {
    let docs: Router<SharedState> = SwaggerUi::new("/docs")
        .url("/api-doc/openapi.json", ApiDoc::openapi())
        .into();

    health::router()
        .merge(rooms::router())
        .merge(lobby::router())
        .merge(docs)
        .with_state(state)
}
