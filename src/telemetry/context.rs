//! Operation context and its propagation across await points.
//!
//! # Responsibilities
//! - Allocate a correlation identity for each inbound request
//! - Bind it to the request's task so nested calls can find their parent
//! - Carry it into spawned tasks on request
//!
//! # Design Decisions
//! - Context lives in a tokio task-local, scoped to the request future
//! - The binding travels with the future, not the worker thread
//! - Nested scopes shadow the outer one and restore it on exit

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_OPERATION: OperationContext;
}

/// Opaque correlation identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.short())
    }
}

impl From<Uuid> for OperationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[derive(Debug)]
struct ContextInner {
    id: OperationId,
    name: String,
    start_time: DateTime<Utc>,
    started: Instant,
}

/// Correlation record for one inbound request.
///
/// Cloning shares the same record; descendants reference it rather than copy it.
#[derive(Clone, Debug)]
pub struct OperationContext {
    inner: Arc<ContextInner>,
}

impl OperationContext {
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Wall-clock time the operation began.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.start_time
    }

    /// Monotonic time since the operation began.
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub(crate) fn started(&self) -> Instant {
        self.inner.started
    }
}

/// Open a new operation. Never fails.
pub fn begin_operation(name: impl Into<String>) -> OperationContext {
    OperationContext {
        inner: Arc::new(ContextInner {
            id: OperationId::new(),
            name: name.into(),
            start_time: Utc::now(),
            started: Instant::now(),
        }),
    }
}

/// Run `body` with `ctx` as the ambient operation, across every suspension point.
pub async fn with_context<F>(ctx: OperationContext, body: F) -> F::Output
where
    F: Future,
{
    CURRENT_OPERATION.scope(ctx, body).await
}

/// Synchronous counterpart of [`with_context`].
pub fn with_context_sync<R>(ctx: OperationContext, body: impl FnOnce() -> R) -> R {
    CURRENT_OPERATION.sync_scope(ctx, body)
}

/// The nearest enclosing operation, if any.
pub fn current_context() -> Option<OperationContext> {
    CURRENT_OPERATION.try_with(|ctx| ctx.clone()).ok()
}

/// Spawn a task that inherits the caller's operation.
///
/// `tokio::spawn` starts tasks with empty task-locals, so background work
/// started from a handler would otherwise lose its parent.
pub fn spawn_in_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current_context() {
        Some(ctx) => tokio::spawn(CURRENT_OPERATION.scope(ctx, future)),
        None => tokio::spawn(future),
    }
}
