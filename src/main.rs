//! World Sync Server - authoritative world synchronization for multiplayer games
//!
//! This is the main entry point. It runs:
//! - the UDP transport feeding inbound packets to the sync core
//! - the periodic collision shape pass
//! - the HTTP status endpoint (health and queue statistics)

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use world_sync::app::AppState;
use world_sync::config::Config;
use world_sync::http::build_router;
use world_sync::net::udp::UdpTransport;
use world_sync::server::Server;
use world_sync::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting World Sync Server");
    info!("Game traffic address: {}", config.udp_addr);
    info!("Status address: {}", config.status_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Transport and sync core
    let transport = Arc::new(UdpTransport::bind(config.udp_addr).await?);
    let server = Arc::new(Server::new(&config, transport.clone()));

    let receiver = tokio::spawn(transport.clone().run(server.clone(), shutdown_rx.clone()));
    let collisions = server.spawn_collision_pass(shutdown_rx);

    // Status endpoint
    let state = AppState::new(config.clone(), server.clone());
    let router = build_router(state);

    let addr: SocketAddr = config.status_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Status endpoint listening on {}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop intake first, then let queued handlers finish
    let _ = shutdown_tx.send(true);
    receiver.await?;
    collisions.await?;
    server.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
