//! Binary entrypoint for the LaunchPlane service.
use launch_plane::{build_router, config::Settings, logging::init_logging, AppState};
use std::{net::SocketAddr, time::Duration};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_logging(&settings.log.level, settings.log.format)?;
    info!(event = "config.loaded", settings = ?settings);

    let state = AppState::from_settings(&settings).await?;
    // Multipart framing overhead on top of the archive itself.
    let body_limit = settings.max_upload_bytes.saturating_add(64 * 1024);
    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(event = "server.listening", %addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(event = "shutdown.signal_error", error = %e);
            return;
        }
        info!(event = "shutdown.signal", "received Ctrl+C");
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
