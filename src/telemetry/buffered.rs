//! Buffered uploading sink.
//!
//! # Data Flow
//! ```text
//! enqueue(envelope)
//!     → bounded channel (try_send, never waits)
//!     → uploader task buffer
//!     → batch full / interval tick / flush command
//!     → POST <ingestion endpoint>/v2/track (retry with backoff)
//! ```
//!
//! # Design Decisions
//! - A single task owns the buffer; callers never take a lock
//! - A full channel drops the event and counts it
//! - Flush is acknowledged through a oneshot and bounded by a timeout

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::TelemetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::telemetry::event::Envelope;
use crate::telemetry::sink::{Sink, SinkError};

/// Ingestion endpoint used when the connection string names none.
pub const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com";

/// Errors parsing a connection string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("connection string is empty")]
    Empty,

    #[error("missing InstrumentationKey")]
    MissingKey,

    #[error("malformed segment '{0}'")]
    MalformedSegment(String),

    #[error("invalid IngestionEndpoint '{0}'")]
    InvalidEndpoint(String),
}

/// Parsed `InstrumentationKey=...;IngestionEndpoint=...` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub instrumentation_key: String,
    pub ingestion_endpoint: url::Url,
}

impl ConnectionInfo {
    /// URL batches are posted to.
    pub fn track_url(&self) -> url::Url {
        let mut url = self.ingestion_endpoint.clone();
        let path = format!("{}/v2/track", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }
}

impl FromStr for ConnectionInfo {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConnectionStringError::Empty);
        }

        let mut key = None;
        let mut endpoint = None;
        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_string()))?;
            // Keys are case-insensitive; unknown keys (LiveEndpoint, ...) are ignored.
            match name.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" => key = Some(value.trim().to_string()),
                "ingestionendpoint" => endpoint = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let instrumentation_key = key
            .filter(|k| !k.is_empty())
            .ok_or(ConnectionStringError::MissingKey)?;
        let endpoint = endpoint.unwrap_or_else(|| DEFAULT_INGESTION_ENDPOINT.to_string());
        let ingestion_endpoint = url::Url::parse(&endpoint)
            .map_err(|_| ConnectionStringError::InvalidEndpoint(endpoint.clone()))?;

        Ok(Self {
            instrumentation_key,
            ingestion_endpoint,
        })
    }
}

/// Tuning for [`BufferedSink`].
#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub upload_timeout: Duration,
    pub upload_retries: u32,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self::from(&TelemetryConfig::default())
    }
}

impl From<&TelemetryConfig> for SinkOptions {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            capacity: config.buffer_capacity,
            batch_size: config.batch_size,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
            upload_retries: config.upload_retries,
        }
    }
}

enum Command {
    Event(Envelope),
    Flush(oneshot::Sender<bool>),
}

/// Sink that batches envelopes and posts them to an ingestion endpoint.
pub struct BufferedSink {
    tx: mpsc::Sender<Command>,
    uploader: JoinHandle<()>,
}

impl BufferedSink {
    /// Start the uploader task for `info`. Must be called inside a tokio runtime.
    pub fn configure(info: ConnectionInfo, options: SinkOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.capacity.max(1));
        let client = reqwest::Client::builder()
            .timeout(options.upload_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default upload client, upload timeout not applied");
                reqwest::Client::new()
            });

        tracing::info!(
            endpoint = %info.ingestion_endpoint,
            batch_size = options.batch_size,
            capacity = options.capacity,
            "Buffered telemetry sink configured"
        );

        let uploader = Uploader {
            client,
            url: info.track_url(),
            options,
            buffer: Vec::new(),
        };
        let uploader = tokio::spawn(uploader.run(rx));
        Self { tx, uploader }
    }

    /// True once the uploader task has exited.
    pub fn is_closed(&self) -> bool {
        self.uploader.is_finished()
    }
}

#[async_trait]
impl Sink for BufferedSink {
    fn enqueue(&self, envelope: Envelope) -> Result<(), SinkError> {
        self.tx.try_send(Command::Event(envelope)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    async fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        let drained = async {
            self.tx.send(Command::Flush(ack_tx)).await.ok()?;
            ack_rx.await.ok()
        };
        match tokio::time::timeout(timeout, drained).await {
            Ok(Some(ok)) => ok,
            Ok(None) => {
                tracing::warn!("Telemetry uploader is gone, nothing to flush");
                false
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Telemetry flush timed out");
                false
            }
        }
    }
}

struct Uploader {
    client: reqwest::Client,
    url: url::Url,
    options: SinkOptions,
    buffer: Vec<Envelope>,
}

impl Uploader {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let period = self.options.flush_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Event(envelope)) => {
                        self.buffer.push(envelope);
                        if self.buffer.len() >= self.options.batch_size {
                            self.upload().await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        let mut acks = vec![ack];
                        while let Ok(pending) = rx.try_recv() {
                            match pending {
                                Command::Event(envelope) => self.buffer.push(envelope),
                                Command::Flush(ack) => acks.push(ack),
                            }
                        }
                        let ok = self.upload().await;
                        for ack in acks {
                            let _ = ack.send(ok);
                        }
                    }
                    None => {
                        self.upload().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.upload().await;
                }
            }
        }
        tracing::debug!("Telemetry uploader stopped");
    }

    /// Upload everything buffered. Returns false if any batch was lost.
    async fn upload(&mut self) -> bool {
        let mut all_sent = true;
        while !self.buffer.is_empty() {
            let take = self.buffer.len().min(self.options.batch_size.max(1));
            let batch: Vec<Envelope> = self.buffer.drain(..take).collect();
            if !self.send_batch(&batch).await {
                all_sent = false;
                metrics::record_event_dropped("batch", "upload_failed");
            }
        }
        all_sent
    }

    async fn send_batch(&self, batch: &[Envelope]) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.client.post(self.url.clone()).json(batch).send().await;
            match result {
                Ok(response) if response.status().is_success() => {
                    metrics::record_upload("ok");
                    tracing::debug!(events = batch.len(), "Telemetry batch uploaded");
                    return true;
                }
                Ok(response) => {
                    tracing::warn!(status = %response.status(), attempt, "Telemetry upload rejected");
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Telemetry upload failed");
                }
            }

            if attempt > self.options.upload_retries {
                metrics::record_upload("failed");
                return false;
            }
            metrics::record_upload("retry");
            tokio::time::sleep(Backoff::UPLOAD.delay(attempt)).await;
        }
    }
}
