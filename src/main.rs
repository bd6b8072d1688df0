//! Vibe Live Back binary entrypoint wiring REST, SSE and the document store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vibe_live_back::{
    config::AppConfig,
    dao::document_store::memory::MemoryDocumentStore,
    routes,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let operator_password = env::var("OPERATOR_PASSWORD")
        .ok()
        .filter(|value| !value.is_empty());
    if operator_password.is_none() {
        warn!("OPERATOR_PASSWORD is not set; operator sign-in is disabled");
    }

    let app_state = AppState::new(AppConfig::load(), operator_password);
    start_store(&app_state).await?;

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

/// Install the backend named by `STORE_BACKEND` (`memory` unless told otherwise).
///
/// The CouchDB backend is connected by the storage supervisor, so the server
/// starts in degraded mode until the first connection succeeds.
async fn start_store(state: &SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".into());
    match backend.trim() {
        "memory" => {
            info!("using the in-memory document store");
            state
                .install_store(Arc::new(MemoryDocumentStore::new()))
                .await;
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use vibe_live_back::{
                dao::{
                    document_store::{
                        DocumentStore,
                        couchdb::{CouchConfig, CouchDocumentStore},
                    },
                    storage::StorageError,
                },
                services::storage_supervisor,
            };

            let couch = CouchConfig::from_env().context("reading CouchDB settings")?;
            info!(base_url = %couch.base_url, database = %couch.database, "using the CouchDB document store");
            tokio::spawn(storage_supervisor::run(state.clone(), move || {
                let couch = couch.clone();
                async move {
                    let store = CouchDocumentStore::connect(couch)
                        .await
                        .map_err(StorageError::from)?;
                    Ok(Arc::new(store) as Arc<dyn DocumentStore>)
                }
            }));
        }
        other => anyhow::bail!("unsupported STORE_BACKEND `{other}`"),
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
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
