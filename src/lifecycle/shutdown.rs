//! Shutdown coordination and the final telemetry flush.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::telemetry::TelemetryClient;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Exit code after a shutdown, whatever the flush outcome.
pub const EXIT_OK: i32 = 0;
/// Exit code when the server failed before any termination signal.
pub const EXIT_SERVER_FAILED: i32 = 1;

type ServerHandle = JoinHandle<Result<(), std::io::Error>>;

/// Stops the server on a termination signal, then drains telemetry.
pub struct ShutdownFlush {
    client: TelemetryClient,
    flush_timeout: Duration,
    drain_timeout: Duration,
    shutdown: Shutdown,
    server: Option<ServerHandle>,
}

impl ShutdownFlush {
    pub fn new(client: TelemetryClient, flush_timeout: Duration) -> Self {
        Self {
            client,
            flush_timeout,
            drain_timeout: Duration::from_secs(30),
            shutdown: Shutdown::new(),
            server: None,
        }
    }

    /// Wait up to `timeout` for the server to drain before flushing, so the
    /// root events of in-flight requests make it into the flush.
    pub fn with_server(mut self, server: ServerHandle, timeout: Duration) -> Self {
        self.server = Some(server);
        self.drain_timeout = timeout;
        self
    }

    /// Coordinator the server should subscribe to.
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Await `signal`, stop the server, flush once, and return the exit code.
    ///
    /// A server that stops on its own ends the wait early; the flush still
    /// runs, and a server failure turns into [`EXIT_SERVER_FAILED`].
    pub async fn run<F>(mut self, signal: F) -> i32
    where
        F: Future,
    {
        let early_exit = match self.server.as_mut() {
            Some(server) => tokio::select! {
                _ = signal => None,
                exited = server => Some(exited),
            },
            None => {
                signal.await;
                None
            }
        };

        let mut code = EXIT_OK;
        if let Some(exited) = early_exit {
            self.server = None;
            code = server_exit_code(exited);
            tracing::error!(code, "Server stopped before a termination signal");
        }

        tracing::info!("Shutting down");
        self.shutdown.trigger();

        if let Some(server) = self.server.take() {
            match tokio::time::timeout(self.drain_timeout, server).await {
                Ok(exited) => {
                    server_exit_code(exited);
                }
                Err(_) => tracing::warn!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Server did not drain in time"
                ),
            }
        }

        if !self.client.flush(self.flush_timeout).await {
            tracing::warn!("Exiting with unflushed telemetry");
        }
        code
    }
}

fn server_exit_code(exited: Result<Result<(), std::io::Error>, tokio::task::JoinError>) -> i32 {
    match exited {
        Ok(Ok(())) => EXIT_OK,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Server exited with error");
            EXIT_SERVER_FAILED
        }
        Err(e) => {
            tracing::error!(error = %e, "Server task failed");
            EXIT_SERVER_FAILED
        }
    }
}
