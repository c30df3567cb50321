//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Telemetry upload:
//!     → bounded by the per-upload HTTP timeout
//!     → On failure: backoff.rs (exponential delay with jitter), retry
//!     → Out of retries: batch dropped and counted
//! ```
//!
//! # Design Decisions
//! - Every upload has a deadline
//! - Retries are bounded; telemetry never grows without limit
//! - Inbound request deadlines are middleware (`TimeoutLayer`), not here

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
