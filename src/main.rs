//! Quiz room backend binary entrypoint wiring configuration, storage and the REST layer.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_room_back::{
    config::AppConfig,
    dao::{
        room_store::{RoomStore, memory::MemoryRoomStore},
        storage::StorageError,
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    spawn_storage(app_state.clone())?;
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the storage supervisor for the backend named by `ROOM_STORE`
/// (`memory`, `mongo` or `couch`; defaults to `memory`).
fn spawn_storage(state: SharedState) -> anyhow::Result<()> {
    let backend = env::var("ROOM_STORE").unwrap_or_else(|_| "memory".into());
    info!(backend = %backend, "selecting room store");

    match backend.trim().to_ascii_lowercase().as_str() {
        "memory" => {
            let store = MemoryRoomStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store: Arc<dyn RoomStore> = Arc::new(store.clone());
                async move { Ok::<_, StorageError>(store) }
            }));
        }
        #[cfg(feature = "mongo-store")]
        "mongo" | "mongodb" => {
            use quiz_room_back::dao::room_store::mongodb::{MongoConfig, MongoRoomStore};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoRoomStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn RoomStore>)
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" | "couchdb" => {
            use quiz_room_back::dao::room_store::couchdb::{CouchConfig, CouchRoomStore};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = CouchConfig::from_env()?;
                let store = CouchRoomStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn RoomStore>)
            }));
        }
        other => bail!("unsupported ROOM_STORE backend `{other}`"),
    }

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
