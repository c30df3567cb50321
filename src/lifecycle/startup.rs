//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the process-wide telemetry client from configuration
//! - Pick the sink: buffered upload when a connection string is configured,
//!   the structured log otherwise
//!
//! # Design Decisions
//! - The client is built once here and passed to every component
//! - A connection string that fails to parse degrades to the log sink; it
//!   never stops the service

use std::sync::Arc;

use crate::config::TelemetryConfig;
use crate::telemetry::{BufferedSink, ConnectionInfo, Sink, SinkOptions, TelemetryClient, TracingSink};

/// Build the telemetry client. Must be called inside a tokio runtime.
pub fn build_telemetry(config: &TelemetryConfig) -> TelemetryClient {
    let connection = config
        .connection_string
        .as_deref()
        .map(str::parse::<ConnectionInfo>)
        .transpose()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring telemetry connection string");
            None
        });

    match connection {
        Some(info) => {
            let key = info.instrumentation_key.clone();
            let sink: Arc<dyn Sink> = Arc::new(BufferedSink::configure(info, SinkOptions::from(config)));
            TelemetryClient::new(sink, config.role_name.clone()).with_instrumentation_key(key)
        }
        None => {
            tracing::info!("No telemetry connection string, events go to the log");
            TelemetryClient::new(Arc::new(TracingSink), config.role_name.clone())
        }
    }
}
