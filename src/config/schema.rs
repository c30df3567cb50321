//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Telemetry sink settings.
    pub telemetry: TelemetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Upstream probed by the diagnostic route.
    pub upstream: UpstreamConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Telemetry sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `InstrumentationKey=...;IngestionEndpoint=...`. Without one, events
    /// go to the structured log.
    pub connection_string: Option<String>,

    /// Role name stamped on every envelope.
    pub role_name: String,

    /// Events per upload batch.
    pub batch_size: usize,

    /// Events the sink may hold before dropping new ones.
    pub buffer_capacity: usize,

    /// Periodic upload interval in milliseconds.
    pub flush_interval_ms: u64,

    /// Upper bound on the shutdown flush in seconds.
    pub flush_timeout_secs: u64,

    /// Per-upload HTTP timeout in seconds.
    pub upload_timeout_secs: u64,

    /// Retries for a rejected or failed upload.
    pub upload_retries: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            role_name: "request-telemetry".to_string(),
            batch_size: 100,
            buffer_capacity: 10_000,
            flush_interval_ms: 5_000,
            flush_timeout_secs: 5,
            upload_timeout_secs: 10,
            upload_retries: 2,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Outbound call timeout in seconds.
    pub outbound_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            outbound_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Upstream service used by `/api/test/upstream`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Absolute URL to call, e.g. "http://inventory:3000/health".
    pub url: Option<String>,
}
