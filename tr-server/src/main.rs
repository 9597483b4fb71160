//! Tractor Royale signaling relay
//!
//! Introduces peers in a room and forwards their link negotiation

use anyhow::Result;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tr_server::{reaper, signaling, RelayState, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    info!("Starting Tractor Royale signaling relay");

    let state = RelayState::new(config.clone());
    let app = signaling::create_router(state.clone());

    let cancel = CancellationToken::new();
    let reaper = tokio::spawn(reaper::run(state, cancel.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Signaling relay running on port {}", config.port);
    info!("WebSocket endpoint: ws://localhost:{}", config.port);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    reaper.await?;
    Ok(())
}
