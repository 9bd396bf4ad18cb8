//! Structured metrics for stage activity.
//!
//! The theater never writes to stdout or stderr; it counts. Tests and
//! diagnostics read the counters through [`crate::theater::Theater::metrics`].
//! Event-level detail goes through [`crate::tracing_compat`] instead.

mod metrics;

pub use metrics::{Counter, Gauge, StageMetrics};
