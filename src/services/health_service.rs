use tracing::warn;

use crate::{
    dto::health::{HealthResponse, StoreHealth},
    state::{SharedState, clock::format_epoch_ms},
};

/// Ping the room store and report whether rooms are currently usable.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_room_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "room store health check failed");
            }
        }
        Err(_) => warn!("room store unavailable (degraded mode)"),
    }

    let status = if state.is_degraded().await {
        StoreHealth::Degraded
    } else {
        StoreHealth::Ok
    };
    let server_now = state.now_ms();
    HealthResponse {
        status,
        server_now,
        server_now_iso: format_epoch_ms(server_now),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::memory::MemoryRoomStore,
        state::{AppState, clock::ManualClock},
    };

    #[tokio::test]
    async fn reports_degraded_without_store() {
        let clock = Arc::new(ManualClock::new(0));
        let state = AppState::with_clock(AppConfig::default(), clock);
        let health = health_status(&state).await;
        assert_eq!(health.status, StoreHealth::Degraded);
        assert_eq!(health.server_now_iso, "1970-01-01T00:00:00Z");

        state.set_room_store(Arc::new(MemoryRoomStore::new())).await;
        assert_eq!(health_status(&state).await.status, StoreHealth::Ok);
    }
}
