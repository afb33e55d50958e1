use serde::Serialize;
use utoipa::ToSchema;

/// Whether a room store is installed and answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoreHealth {
    /// Rooms can be read and written.
    Ok,
    /// No usable store; every room operation fails fast.
    Degraded,
}

/// Payload of `/healthcheck`. Clients also use `server_now` to estimate their
/// clock offset before joining a room.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: StoreHealth,
    pub server_now: i64,
    pub server_now_iso: String,
}
