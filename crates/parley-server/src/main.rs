//! # Parley server
//!
//! Boots the real-time core: config, tracing, PostgreSQL, the hub, and the
//! `/ws` endpoint. The HTTP front end (registration, profiles, images) is a
//! separate service; this binary owns only the live plane.

use std::net::SocketAddr;
use std::sync::Arc;

use parley_hub::{Hub, HubState, build_router};
use parley_voice::SessionProvider;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = parley_common::config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=info".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));

    let db = parley_db::Database::connect(&config).await?;
    db.migrate().await?;

    // The media engine is pluggable; without one the server runs chat-only
    // and signaling methods answer with a transport error.
    let sfu: Option<Arc<dyn SessionProvider>> = None;
    if sfu.is_none() {
        tracing::warn!("no media engine configured, group calls are signaling-rejected");
    }

    let hub = Hub::new(db.stores(), sfu);

    let router = build_router(HubState {
        hub,
        jwt_secret: config.auth.jwt_secret.clone(),
        dev_mode: config.server.dev_mode,
    })
    .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Hub listening on ws://{addr}/ws");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
