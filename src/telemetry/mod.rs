//! Telemetry correlation subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → context.rs (begin_operation, bound to the request task)
//!     → instrument.rs (InProc dependencies for wrapped async fns)
//!     → outbound.rs (HTTP dependencies for outgoing calls)
//!     → client.rs (stamp envelope, absorb sink errors)
//!     → sink.rs / buffered.rs (buffer, upload, flush on shutdown)
//! ```
//!
//! # Design Decisions
//! - One explicitly constructed client per process, no global state
//! - Parent ids are read from the ambient operation at call time
//! - Business results pass through untouched; telemetry failures are absorbed

pub mod buffered;
pub mod client;
pub mod context;
pub mod event;
pub mod instrument;
pub mod outbound;
pub mod sink;

pub use buffered::{BufferedSink, ConnectionInfo, SinkOptions};
pub use client::TelemetryClient;
pub use context::{
    begin_operation, current_context, spawn_in_context, with_context, with_context_sync,
    OperationContext, OperationId,
};
pub use event::{
    CapturedError, DependencyEvent, Envelope, ExceptionEvent, Properties, SeverityLevel,
    TelemetryItem,
};
pub use instrument::{instrument, AsyncOp};
pub use outbound::{wrap_outbound_client, CallInfo, DependencyHandle, OutboundLayer, Outcome, TrackedClient, TrackedRequestBuilder};
pub use sink::{MemorySink, Sink, SinkError, TracingSink};
