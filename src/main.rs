//! request-telemetry service entry point.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id ─▶ trace ─▶ request telemetry ─▶ handler (instrumented)
//!                                            │   opens operation     │
//!                                            │                       ├─▶ TrackedClient ─▶ upstream
//!                                            ▼                       ▼
//!                                     root dependency         child dependencies
//!                                            │                       │
//!                                            └──────▶ TelemetryClient ◀┘
//!                                                          │
//!                                                          ▼
//!                                          BufferedSink ─▶ ingestion endpoint
//!                                          (flushed on SIGTERM / Ctrl+C)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use request_telemetry::config::{self, ServiceConfig};
use request_telemetry::http::HttpServer;
use request_telemetry::lifecycle::{build_telemetry, wait_for_termination, ShutdownFlush};
use request_telemetry::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "request-telemetry", version, about = "HTTP service with correlated request telemetry")]
struct Args {
    /// TOML configuration file. Defaults plus environment when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config: ServiceConfig = config::load(args.config.as_deref(), args.bind)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-telemetry starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        role = %config.telemetry.role_name,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let telemetry = build_telemetry(&config.telemetry);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let flush_timeout = Duration::from_secs(config.telemetry.flush_timeout_secs);
    let drain_timeout = Duration::from_secs(config.timeouts.request_secs);
    let flusher = ShutdownFlush::new(telemetry.clone(), flush_timeout);

    let server = HttpServer::new(config, telemetry);
    let server = tokio::spawn(server.run(listener, flusher.shutdown().subscribe()));

    let code = flusher
        .with_server(server, drain_timeout)
        .run(wait_for_termination())
        .await;

    tracing::info!(code, "Shutdown complete");
    std::process::exit(code);
}
