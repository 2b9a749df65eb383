use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

// Use jemalloc on Linux for reduced fragmentation on long-running server
// processes. On Windows/macOS the default system allocator is used instead.
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use watchparty_server::{config::ServerConfig, routing, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("watchparty_server=debug".parse()?)
                .add_directive("axum=info".parse()?),
        )
        .init();

    info!("Starting WatchParty room hub");

    let config = ServerConfig::from_env()?;
    info!("Configuration loaded ({})", config.environment);

    let state = Arc::new(AppState::new(config.clone())?);
    match &state.mirror {
        Some(_) => info!("Room metadata mirror enabled"),
        None => info!("Room metadata mirror disabled (WP_CACHE_URL unset)"),
    }

    let app = routing::create_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    // Graceful shutdown signal (cross-platform)
    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received, draining connections...");
    };

    info!("Server listening on http://{}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server stopped cleanly");
    Ok(())
}
