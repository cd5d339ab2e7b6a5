//! ==============================================================================
//! main.rs - mesh bridge entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the serial link, the broadcast hub and the web server together
//!     and runs them until ctrl-c.
//!
//! responsibilities:
//!     - parse cli overrides and load bridge.toml
//!     - install the tracing subscriber
//!     - start the hub, the outbound writer and the link supervisor
//!     - serve viewers on /ws and status on /api/status
//!     - shut everything down in order
//!
//! architecture:
//!
//! ```text
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ link        │  │ web server  │  │ outbound writer     │  │
//!     │  │ supervisor  │  │ (/ws, /api) │  │ (serial tx)         │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │                │                    │             │
//!     │         └────────────────┼────────────────────┘             │
//!     │                          │                                  │
//!     │                    ┌─────┴─────┐                            │
//!     │                    │    hub    │ <- hub.rs                  │
//!     │                    └───────────┘                            │
//!     └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use mesh_bridge::config::BridgeConfig;
use mesh_bridge::hub::Hub;
use mesh_bridge::link::{LinkSupervisor, SerialSource, WriterSlot};
use mesh_bridge::messages::ViewerMessage;
use mesh_bridge::relay::{self, CommandRelay};
use mesh_bridge::server::{self, AppState};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "mesh-bridge", about = "Serial mesh telemetry to live WebSocket viewers")]
struct Args {
    /// Path to bridge.toml (default: config/bridge.toml, then ../config/bridge.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override serial port (e.g., /dev/tty.usbmodem0001)
    #[arg(short, long)]
    port: Option<String>,

    /// Override listen address (e.g., 127.0.0.1:8080)
    #[arg(long)]
    listen: Option<String>,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // startup banner
    println!("===========================================================");
    println!("  Mesh Bridge - serial telemetry to live dashboards");
    println!("===========================================================");

    // step 1: load configuration and apply overrides
    let mut config = BridgeConfig::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.serial.port = port;
    }
    let listen = args.listen.unwrap_or_else(|| config.listen_addr());

    // step 2: logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    config.print_summary();

    // step 3: hub and the single outbound path
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (hub, hub_task) = Hub::spawn(config.hub_config());
    let (outbound_tx, outbound_rx) = relay::outbound_channel();
    let writer = WriterSlot::default();
    let writer_task = tokio::spawn(relay::run_outbound_writer(
        outbound_rx,
        writer.clone(),
        hub.clone(),
    ));

    // step 4: serial link supervisor (reconnects with backoff)
    let source = SerialSource::new(
        config.serial.port.clone(),
        config.serial.baud_rate,
        config.read_timeout(),
    );
    let supervisor = LinkSupervisor::new(
        source,
        hub.clone(),
        writer,
        config.backoff(),
        shutdown_rx.clone(),
    )
    .show_serial_data(config.logging.show_serial_data);
    let link_task = tokio::spawn(supervisor.run());

    // step 5: web server in background
    let state = AppState {
        hub: hub.clone(),
        relay: CommandRelay::new(hub.clone(), outbound_tx),
    };
    let origins = config.server.cors_origins.clone();
    let server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::run_server(&listen, state, &origins, server_shutdown).await {
            tracing::error!("Web server error: {:#}", e);
        }
    });

    println!("────────────────────────────────────────────────────────────");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutdown requested");

    // step 6: stop producers first, then the hub, then the servers
    let _ = hub
        .broadcast(ViewerMessage::log("bridge shutting down"))
        .await;
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, link_task).await.is_err() {
        tracing::warn!("Link supervisor did not stop in time");
    }
    hub.shutdown().await;
    let _ = hub_task.await;
    if tokio::time::timeout(SHUTDOWN_GRACE, server_task).await.is_err() {
        tracing::warn!("Web server did not stop in time");
    }
    writer_task.abort();

    println!("Stopped.");
    Ok(())
}
