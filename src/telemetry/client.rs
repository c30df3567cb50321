//! Explicitly constructed telemetry client.
//!
//! One client is built at startup and cloned into every component that emits
//! telemetry. It never returns errors to its callers: a sink refusal is logged
//! and counted, and the business call carries on.

use std::fmt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;

use crate::observability::metrics;
use crate::telemetry::context::{current_context, OperationId};
use crate::telemetry::event::{
    CapturedError, CustomEvent, DependencyEvent, Envelope, ExceptionEvent, Properties,
    SeverityLevel, TelemetryItem, TraceEvent, TYPE_IN_PROC,
};
use crate::telemetry::sink::Sink;

/// Handle to the process-wide sink.
#[derive(Clone)]
pub struct TelemetryClient {
    sink: Arc<dyn Sink>,
    role: Arc<str>,
    instrumentation_key: Option<Arc<str>>,
}

impl fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl TelemetryClient {
    /// Create a client over `sink`, stamping envelopes with `role`.
    pub fn new(sink: Arc<dyn Sink>, role: impl Into<String>) -> Self {
        Self {
            sink,
            role: role.into().into(),
            instrumentation_key: None,
        }
    }

    /// Stamp envelopes with an instrumentation key.
    pub fn with_instrumentation_key(mut self, key: impl Into<String>) -> Self {
        self.instrumentation_key = Some(key.into().into());
        self
    }

    /// Logical name of this service; used as the target of in-process dependencies.
    pub fn role(&self) -> &str {
        &self.role
    }

    fn emit(&self, item: TelemetryItem) {
        let kind = item.kind();
        let mut envelope = Envelope::new(self.role.as_ref(), item);
        envelope.instrumentation_key = self.instrumentation_key.as_deref().map(str::to_string);

        match self.sink.enqueue(envelope) {
            Ok(()) => metrics::record_event_enqueued(kind),
            Err(e) => {
                metrics::record_event_dropped(kind, "rejected");
                tracing::debug!(kind, error = %e, "Telemetry event dropped");
            }
        }
    }

    pub fn track_dependency(&self, event: DependencyEvent) {
        self.emit(TelemetryItem::Dependency(event));
    }

    pub fn track_exception(&self, event: ExceptionEvent) {
        self.emit(TelemetryItem::Exception(event));
    }

    /// Record a diagnostic message, correlated to the ambient operation.
    pub fn track_trace(&self, message: impl Into<String>, severity: SeverityLevel, properties: Properties) {
        self.emit(TelemetryItem::Trace(TraceEvent {
            message: message.into(),
            severity,
            properties,
            parent_id: current_context().map(|ctx| ctx.id()),
        }));
    }

    /// Record a named business event, correlated to the ambient operation.
    pub fn track_event(&self, name: impl Into<String>, properties: Properties) {
        self.emit(TelemetryItem::Event(CustomEvent {
            name: name.into(),
            properties,
            parent_id: current_context().map(|ctx| ctx.id()),
        }));
    }

    /// Emit the exception half of a failed dependency.
    pub(crate) fn track_failure(
        &self,
        error: CapturedError,
        dependency: &DependencyEvent,
        mut properties: Properties,
    ) {
        properties.insert("dependency".to_string(), dependency.name.clone());
        properties.insert("dependencyType".to_string(), dependency.type_name.clone());
        self.track_exception(ExceptionEvent {
            error,
            properties,
            parent_id: dependency.parent_id,
            dependency_id: Some(dependency.id),
        });
    }

    /// Measure `future` as an in-process dependency named `name`.
    ///
    /// The parent is the operation that is ambient when `track` is called.
    /// The output is returned untouched; an `Err` is recorded with a paired
    /// exception before it is handed back. A panic is recorded the same way
    /// and then resumed.
    pub fn track<F, T, E>(&self, name: impl Into<String>, future: F) -> impl Future<Output = Result<T, E>> + Send
    where
        F: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: fmt::Display + Send,
    {
        let client = self.clone();
        let name = name.into();
        let parent_id = current_context().map(|ctx| ctx.id());

        async move {
            let started = Instant::now();
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => {
                    let failure = result.as_ref().err().map(CapturedError::capture);
                    client.record_in_proc(name, parent_id, started.elapsed(), failure);
                    result
                }
                Err(payload) => {
                    let failure = CapturedError::message("panic", panic_message(&*payload));
                    client.record_in_proc(name, parent_id, started.elapsed(), Some(failure));
                    panic::resume_unwind(payload)
                }
            }
        }
    }

    fn record_in_proc(
        &self,
        name: String,
        parent_id: Option<OperationId>,
        duration: Duration,
        failure: Option<CapturedError>,
    ) {
        let event = DependencyEvent {
            id: OperationId::new(),
            target: self.role.to_string(),
            data: name.clone(),
            name,
            duration,
            success: failure.is_none(),
            result_code: None,
            type_name: TYPE_IN_PROC.to_string(),
            parent_id,
            properties: Properties::new(),
        };

        if let Some(error) = failure {
            self.track_failure(error, &event, Properties::new());
        }
        self.track_dependency(event);
    }

    /// Ask the sink to drain. Returns whether it finished within `timeout`.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        let flushed = self.sink.flush(timeout).await;
        metrics::record_flush(flushed);
        tracing::info!(
            flushed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Telemetry flush finished"
        );
        flushed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::context::{begin_operation, with_context};
    use crate::telemetry::sink::{MemorySink, SinkError};
    use async_trait::async_trait;

    struct RejectingSink;

    #[async_trait]
    impl Sink for RejectingSink {
        fn enqueue(&self, _envelope: Envelope) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("ingestion endpoint down".into()))
        }

        async fn flush(&self, _timeout: Duration) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_sink_rejection_is_absorbed() {
        let client = TelemetryClient::new(Arc::new(RejectingSink), "svc");
        let value: Result<u32, String> = client.track("compute", async { Ok(7) }).await;
        assert_eq!(value, Ok(7));
        client.track_event("noop", Properties::new());
        assert!(!client.flush(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_trace_and_event_pick_up_parent() {
        let sink = Arc::new(MemorySink::new());
        let client = TelemetryClient::new(sink.clone(), "svc").with_instrumentation_key("ikey");
        let ctx = begin_operation("GET /menu");
        let expected = ctx.id();

        with_context(ctx, async {
            client.track_trace("loading menu", SeverityLevel::Information, Properties::new());
            client.track_event("menu_viewed", Properties::new());
        })
        .await;

        let envelopes = sink.envelopes();
        assert_eq!(envelopes.len(), 2);
        for envelope in &envelopes {
            assert_eq!(envelope.instrumentation_key.as_deref(), Some("ikey"));
            let parent = match &envelope.item {
                TelemetryItem::Trace(t) => t.parent_id,
                TelemetryItem::Event(e) => e.parent_id,
                other => panic!("unexpected item {:?}", other),
            };
            assert_eq!(parent, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_track_failure_pairs_exception() {
        let sink = Arc::new(MemorySink::new());
        let client = TelemetryClient::new(sink.clone(), "svc");

        let result: Result<(), String> = client.track("charge", async { Err("card declined".to_string()) }).await;
        assert_eq!(result, Err("card declined".to_string()));

        let deps = sink.dependencies();
        let excs = sink.exceptions();
        assert_eq!(deps.len(), 1);
        assert_eq!(excs.len(), 1);
        assert!(!deps[0].success);
        assert_eq!(deps[0].type_name, TYPE_IN_PROC);
        assert_eq!(deps[0].target, "svc");
        assert_eq!(excs[0].dependency_id, Some(deps[0].id));
        assert_eq!(excs[0].error.message, "card declined");
        assert_eq!(excs[0].properties.get("dependency").map(String::as_str), Some("charge"));
    }
}
