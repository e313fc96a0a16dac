//! Latency probe backend.
//!
//! Run with: cargo run -p latensee-server
//!
//! Prints the `ws://` URL a controller should connect to, then serves links
//! until Ctrl-C.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use latensee_core::PeerRegistry;
use latensee_session::SessionManager;
use latensee_store::DefaultConnector;
use latensee_transport::{
    LinkConfig,
    websocket::{ServerState, bind, router},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(version, about = "Serve store latency measurements to a controller")]
struct Args {
    /// Address to listen on; port 0 picks a free port.
    #[arg(long, env = "LATENSEE_ADDR", default_value = "0.0.0.0:0")]
    addr: String,

    /// Milliseconds between liveness pings.
    #[arg(long, env = "LATENSEE_HEARTBEAT_MS", default_value_t = 500)]
    heartbeat_ms: u64,

    /// Milliseconds of silence after which a controller is dropped.
    #[arg(long, env = "LATENSEE_IDLE_TIMEOUT_MS", default_value_t = 5_000)]
    idle_timeout_ms: u64,

    /// Milliseconds to wait for a controller to acknowledge a callback.
    #[arg(long, env = "LATENSEE_CALL_TIMEOUT_MS", default_value_t = 10_000)]
    call_timeout_ms: u64,

    /// Milliseconds allowed for connecting to the store.
    #[arg(long, env = "LATENSEE_CONNECT_TIMEOUT_MS", default_value_t = 5_000)]
    connect_timeout_ms: u64,
}

impl Args {
    const fn link_config(&self) -> LinkConfig {
        LinkConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let registry = Arc::new(PeerRegistry::new());
    let connect_timeout = Duration::from_millis(args.connect_timeout_ms);
    let connector = DefaultConnector::new().with_connect_timeout(connect_timeout);
    let manager = Arc::new(SessionManager::new(connector, Arc::clone(&registry)));

    let state = ServerState::new(manager, registry).with_link_config(args.link_config());
    let app = router(state);

    let (listener, url) = bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind {}", args.addr))?;
    tracing::info!("Server listening on {url}");
    println!("{url}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
    }
}
