//! Backplane Metrics
//!
//! - MetricsEngine: registry of lazily created counters and meters
//! - RollingAccumulator: lock-free per-second buckets with 300s retention
//! - Reporter: periodic snapshot push to log and `metrics` facade sinks

pub mod engine;
pub mod reporter;
mod rolling;

pub use engine::{Counter, Meter, MetricKind, MetricValues, MetricsEngine, WINDOWS};
pub use reporter::{spawn_metrics_reporter, FacadeSink, LogSink, MetricsSink};
pub use rolling::{WindowTotals, RING_SECONDS};
