//! # beacon-server
//!
//! HTTP host shell for the beacon presence engine.
//!
//! This binary provides:
//! - REST API for configuration, scan ingestion and region transitions
//! - Server-Sent Events stream of engine events
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package beacon-server
//!
//! # Production
//! BEACON_PRODUCTION=true ./beacon-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use beacon_server::api::create_router;
use beacon_server::logging;
use beacon_server::settings::ServerSettings;
use beacon_server::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ServerSettings::load()?;
    logging::init(settings.production, settings.log_dir.as_deref())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting beacon-server");

    let state = AppState::new(&settings).await?;
    let app = create_router(state);

    let listener = TcpListener::bind(settings.bind_address).await?;
    info!("Listening on {}", settings.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("beacon-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
