//! # footfall-server
//!
//! HTTP server for the footfall doorway counter.
//!
//! This binary provides:
//! - REST API for counts, recent activity and BLE link control
//! - A server-sent stream of link transitions
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package footfall-server
//!
//! # Production (on Raspberry Pi)
//! FOOTFALL_CONFIG=/etc/footfall/config.toml ./footfall-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use footfall_core::{open_transport, Config, LinkEvent, Tracker};
use footfall_server::api::create_router;
use footfall_server::logging;
use footfall_server::state::{AppState, SharedState};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    logging::init(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting footfall-server");

    let transport = open_transport(
        config.link.adapter.as_deref(),
        config.link.discovery_timeout(),
    )
    .await;
    let tracker = Tracker::start(transport, &config)?;
    let addr = config.server.socket_addr()?;
    let state = AppState::new(tracker, config).into_shared();

    tokio::spawn(log_link_events(state.clone()));

    let app = create_router(state.clone());
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(err) = state.tracker.disconnect().await {
        warn!(error = %err, "Failed to release the link on shutdown");
    }
    info!("Stopped");

    Ok(())
}

/// Surface link transitions in the log.
async fn log_link_events(state: SharedState) {
    let mut events = state.tracker.subscribe();
    loop {
        match events.recv().await {
            Ok(LinkEvent::Connected { device }) => {
                info!(device = %device.display_name(), "Sensor bridge connected");
            }
            Ok(LinkEvent::ConnectFailed { code, reason }) => {
                warn!(%code, %reason, "Could not connect to the sensor bridge");
            }
            Ok(LinkEvent::RemoteDisconnected { device }) => {
                warn!(device = %device.display_name(), "Sensor bridge dropped the link");
            }
            Ok(LinkEvent::WriteFailed { reason }) => {
                warn!(%reason, "Write to the sensor bridge failed");
            }
            Ok(event) => tracing::debug!(?event, "Link event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Link event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
