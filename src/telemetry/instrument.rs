//! Generic async instrumentation.
//!
//! [`AsyncOp`] is a cloneable, type-erased async function. [`instrument`] wraps
//! one so every invocation is measured and recorded as an `InProc` dependency,
//! correlated to whichever operation is ambient at call time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::telemetry::client::TelemetryClient;

type OpFn<A, T, E> = dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync;

/// A shareable async function `A -> Result<T, E>`.
pub struct AsyncOp<A, T, E> {
    f: Arc<OpFn<A, T, E>>,
    instrumented_as: Option<Arc<str>>,
}

impl<A, T, E> Clone for AsyncOp<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            instrumented_as: self.instrumented_as.clone(),
        }
    }
}

impl<A, T, E> fmt::Debug for AsyncOp<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOp")
            .field("instrumented_as", &self.instrumented_as)
            .finish_non_exhaustive()
    }
}

impl<A, T, E> AsyncOp<A, T, E>
where
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Erase an async function or closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |arg: A| f(arg).boxed()),
            instrumented_as: None,
        }
    }

    /// Invoke the function.
    pub fn call(&self, arg: A) -> BoxFuture<'static, Result<T, E>> {
        (self.f)(arg)
    }

    pub fn is_instrumented(&self) -> bool {
        self.instrumented_as.is_some()
    }

    /// Name this op was instrumented under, if any.
    pub fn instrumented_name(&self) -> Option<&str> {
        self.instrumented_as.as_deref()
    }
}

/// Wrap `op` so each call emits one `InProc` dependency named `name`.
///
/// Wrapping an already instrumented op returns it unchanged, keeping its
/// original name, so a call never produces two events.
pub fn instrument<A, T, E>(client: &TelemetryClient, name: impl Into<String>, op: AsyncOp<A, T, E>) -> AsyncOp<A, T, E>
where
    A: Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    if let Some(existing) = op.instrumented_name() {
        tracing::debug!(name = existing, "Operation already instrumented");
        return op;
    }

    let name: Arc<str> = name.into().into();
    let client = client.clone();
    let inner = op.f;
    let label = name.clone();

    AsyncOp {
        f: Arc::new(move |arg: A| {
            // Resolve the parent now: the wrapper may be shared by many requests.
            client.track(label.to_string(), inner(arg)).boxed()
        }),
        instrumented_as: Some(name),
    }
}

impl TelemetryClient {
    /// Method form of [`instrument`].
    pub fn instrument<A, T, E>(&self, name: impl Into<String>, op: AsyncOp<A, T, E>) -> AsyncOp<A, T, E>
    where
        A: Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        instrument(self, name, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::context::{begin_operation, with_context};
    use crate::telemetry::event::TYPE_IN_PROC;
    use crate::telemetry::sink::MemorySink;
    use std::time::Duration;

    fn setup() -> (Arc<MemorySink>, TelemetryClient) {
        let sink = Arc::new(MemorySink::new());
        let client = TelemetryClient::new(sink.clone(), "pizza-api");
        (sink, client)
    }

    #[tokio::test]
    async fn test_fetch_user_returns_value_and_records_duration() {
        let (sink, client) = setup();
        let fetch_user = AsyncOp::new(|id: u32| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(format!("user-{}", id))
        });
        let fetch_user = instrument(&client, "fetchUser", fetch_user);

        assert_eq!(fetch_user.call(42).await, Ok("user-42".to_string()));

        let deps = sink.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "fetchUser");
        assert_eq!(deps[0].type_name, TYPE_IN_PROC);
        assert!(deps[0].success);
        assert!(deps[0].parent_id.is_none());
        assert!(deps[0].duration_ms() >= 50.0, "duration {}", deps[0].duration_ms());
        assert!(deps[0].duration_ms() < 1000.0, "duration {}", deps[0].duration_ms());
        assert!(sink.exceptions().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_returned_unchanged() {
        #[derive(Debug, PartialEq)]
        struct OutOfDough(u8);
        impl fmt::Display for OutOfDough {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "out of dough at oven {}", self.0)
            }
        }

        let (sink, client) = setup();
        let bake = client.instrument("bake", AsyncOp::new(|oven: u8| async move { Err::<(), _>(OutOfDough(oven)) }));

        assert_eq!(bake.call(3).await, Err(OutOfDough(3)));

        let deps = sink.dependencies();
        let excs = sink.exceptions();
        assert_eq!(deps.len(), 1);
        assert!(!deps[0].success);
        assert_eq!(excs.len(), 1);
        assert_eq!(excs[0].error.message, "out of dough at oven 3");
        assert_eq!(excs[0].dependency_id, Some(deps[0].id));
    }

    #[tokio::test]
    async fn test_panic_is_recorded_then_resumed() {
        let (sink, client) = setup();
        let bake = client.instrument(
            "bake",
            AsyncOp::new(|oven: u8| async move {
                if oven > 0 {
                    panic!("oven {} on fire", oven);
                }
                Ok::<(), String>(())
            }),
        );

        let ctx = begin_operation("POST /api/pizzas");
        let expected = ctx.id();
        let outcome = with_context(ctx, async {
            std::panic::AssertUnwindSafe(bake.call(4)).catch_unwind().await
        })
        .await;
        assert!(outcome.is_err());

        let deps = sink.dependencies();
        let excs = sink.exceptions();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "bake");
        assert!(!deps[0].success);
        assert_eq!(deps[0].parent_id, Some(expected));
        assert_eq!(excs.len(), 1);
        assert_eq!(excs[0].error.type_name, "panic");
        assert_eq!(excs[0].error.message, "oven 4 on fire");
        assert_eq!(excs[0].dependency_id, Some(deps[0].id));
    }

    #[tokio::test]
    async fn test_double_instrument_emits_once() {
        let (sink, client) = setup();
        let op = AsyncOp::new(|_: ()| async { Ok::<_, String>(1) });
        let once = instrument(&client, "load", op);
        let twice = instrument(&client, "load-again", once.clone());

        assert_eq!(twice.instrumented_name(), Some("load"));
        twice.call(()).await.unwrap();
        once.call(()).await.unwrap();

        let deps = sink.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps.iter().all(|d| d.name == "load"));
    }

    #[tokio::test]
    async fn test_parent_resolved_at_call_time() {
        let (sink, client) = setup();
        let op = instrument(&client, "lookup", AsyncOp::new(|_: ()| async { Ok::<_, String>(()) }));

        let first = begin_operation("GET /a");
        let second = begin_operation("GET /b");
        let (first_id, second_id) = (first.id(), second.id());

        let op_a = op.clone();
        with_context(first, async move { op_a.call(()).await }).await.unwrap();
        with_context(second, async { op.call(()).await }).await.unwrap();

        let parents: Vec<_> = sink.dependencies().iter().map(|d| d.parent_id).collect();
        assert_eq!(parents, vec![Some(first_id), Some(second_id)]);
    }
}
