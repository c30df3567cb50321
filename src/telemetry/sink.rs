//! Sink contract and the in-process sinks.
//!
//! # Design Decisions
//! - `enqueue` is synchronous and must return promptly; a refusal is reported
//!   as [`SinkError`] and absorbed by the client
//! - `flush` is the single serialization point and enforces its own timeout

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::telemetry::event::{DependencyEvent, Envelope, ExceptionEvent, TelemetryItem};

/// Reasons a sink may refuse an event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink buffer is full")]
    BufferFull,

    #[error("sink is closed")]
    Closed,

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Telemetry backend collaborator.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Accept one envelope without blocking.
    fn enqueue(&self, envelope: Envelope) -> Result<(), SinkError>;

    /// Drain buffered envelopes. Returns `false` if the drain did not complete
    /// within `timeout`.
    async fn flush(&self, timeout: Duration) -> bool;
}

/// Sink that keeps every envelope in memory.
#[derive(Default)]
pub struct MemorySink {
    envelopes: Mutex<Vec<Envelope>>,
    flushes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn dependencies(&self) -> Vec<DependencyEvent> {
        self.envelopes()
            .into_iter()
            .filter_map(|e| match e.item {
                TelemetryItem::Dependency(dep) => Some(dep),
                _ => None,
            })
            .collect()
    }

    pub fn exceptions(&self) -> Vec<ExceptionEvent> {
        self.envelopes()
            .into_iter()
            .filter_map(|e| match e.item {
                TelemetryItem::Exception(exc) => Some(exc),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.envelopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times `flush` has been called.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn enqueue(&self, envelope: Envelope) -> Result<(), SinkError> {
        self.envelopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope);
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> bool {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Sink that writes each envelope to the structured log.
///
/// Used when no ingestion endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl Sink for TracingSink {
    fn enqueue(&self, envelope: Envelope) -> Result<(), SinkError> {
        match serde_json::to_string(&envelope.item) {
            Ok(payload) => tracing::debug!(
                target: "telemetry",
                kind = envelope.item.kind(),
                role = %envelope.role,
                %payload,
                "Telemetry event"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize telemetry event"),
        }
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> bool {
        true
    }
}
