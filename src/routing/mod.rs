//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration (at startup):
//!     (method, path, handler)
//!     → router.rs (RouteTable, optional per-route instrumentation)
//!     → instrument.rs (auto_instrument_routes over the whole table)
//!     → RouteTable::into_router (axum Router, bad entries skipped)
//! ```
//!
//! # Design Decisions
//! - Routes are fixed at startup, immutable at runtime
//! - Instrumentation is idempotent; a handler is never wrapped twice
//! - A malformed entry is logged and skipped, never fatal

pub mod instrument;
pub mod router;

pub use instrument::{auto_instrument_routes, InstrumentationReport};
pub use router::{handler, RouteEntry, RouteHandler, RouteTable};
