//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes and timeouts > 0, addresses parse)
//! - Validate the telemetry connection string
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::telemetry::buffered::{ConnectionInfo, ConnectionStringError};

/// A single semantic problem in the configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("telemetry.batch_size ({batch}) exceeds telemetry.buffer_capacity ({capacity})")]
    BatchLargerThanBuffer { batch: usize, capacity: usize },

    #[error("telemetry.connection_string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    #[error("invalid upstream.url '{0}'")]
    InvalidUpstream(String),
}

/// `ip:port` or `hostname:port`, the forms a TCP listener resolves.
fn is_bind_address(value: &str) -> bool {
    if value.parse::<SocketAddr>().is_ok() {
        return true;
    }
    let Some((host, port)) = value.rsplit_once(':') else {
        return false;
    };
    !host.is_empty()
        && host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && port.parse::<u16>().is_ok()
}

/// Check the configuration, collecting every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_bind_address(&config.listener.bind_address) {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let telemetry = &config.telemetry;
    let positive = [
        ("telemetry.batch_size", telemetry.batch_size as u64),
        ("telemetry.buffer_capacity", telemetry.buffer_capacity as u64),
        ("telemetry.flush_interval_ms", telemetry.flush_interval_ms),
        ("telemetry.flush_timeout_secs", telemetry.flush_timeout_secs),
        ("telemetry.upload_timeout_secs", telemetry.upload_timeout_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.outbound_secs", config.timeouts.outbound_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if telemetry.batch_size > telemetry.buffer_capacity && telemetry.buffer_capacity > 0 {
        errors.push(ValidationError::BatchLargerThanBuffer {
            batch: telemetry.batch_size,
            capacity: telemetry.buffer_capacity,
        });
    }

    if let Some(conn) = &telemetry.connection_string {
        if let Err(e) = conn.parse::<ConnectionInfo>() {
            errors.push(e.into());
        }
    }

    if let Some(upstream) = &config.upstream.url {
        if url::Url::parse(upstream).is_err() {
            errors.push(ValidationError::InvalidUpstream(upstream.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
