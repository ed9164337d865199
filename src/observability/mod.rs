//! Observability for revstore
//!
//! - Structured JSON logging with a process-wide severity threshold
//! - Per-file operational counters
//!
//! Observability is read-only: nothing here influences storage decisions.

mod logger;
mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::{LogMetrics, LogMetricsSnapshot};
