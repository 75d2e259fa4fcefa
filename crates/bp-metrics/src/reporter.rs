//! Periodic metric reporting
//!
//! Pushes `MetricsEngine` snapshots to one or more sinks on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, Instrument};

use bp_common::logging::component_span;

use crate::engine::{MetricValues, MetricsEngine};

/// Destination for metric snapshots.
pub trait MetricsSink: Send + Sync {
    fn report(&self, values: &[MetricValues]);
}

/// Text dump of each metric through the log.
pub struct LogSink;

impl MetricsSink for LogSink {
    fn report(&self, values: &[MetricValues]) {
        for v in values {
            info!(
                metric = %v.name,
                current = v.current,
                avg15 = v.avg15,
                avg60 = v.avg60,
                avg300 = v.avg300,
                "Metric"
            );
        }
    }
}

/// Mirrors snapshots into the `metrics` facade as gauges so an installed
/// exporter (e.g. Prometheus) can scrape them.
pub struct FacadeSink {
    prefix: String,
}

impl FacadeSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn gauge_name(&self, metric: &str, window: &str) -> String {
        let metric: String = metric
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("{}_{}_{}", self.prefix, metric, window)
    }
}

impl MetricsSink for FacadeSink {
    fn report(&self, values: &[MetricValues]) {
        for v in values {
            gauge!(self.gauge_name(&v.name, "current")).set(v.current);
            gauge!(self.gauge_name(&v.name, "avg15")).set(v.avg15);
            gauge!(self.gauge_name(&v.name, "avg60")).set(v.avg60);
            gauge!(self.gauge_name(&v.name, "avg300")).set(v.avg300);
        }
    }
}

/// Spawn the reporting loop. Abort the returned handle to stop it.
pub fn spawn_metrics_reporter(
    engine: Arc<MetricsEngine>,
    period: Duration,
    sinks: Vec<Arc<dyn MetricsSink>>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            info!(period_secs = period.as_secs(), sinks = sinks.len(), "Starting metrics reporter");
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; skip the empty initial report.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let values = engine.get_values();
                debug!(metrics = values.len(), "Reporting metrics");
                for sink in &sinks {
                    sink.report(&values);
                }
            }
        }
        .instrument(component_span("metrics-reporter")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CaptureSink {
        reports: Mutex<Vec<Vec<MetricValues>>>,
    }

    impl MetricsSink for CaptureSink {
        fn report(&self, values: &[MetricValues]) {
            self.reports.lock().unwrap().push(values.to_vec());
        }
    }

    #[test]
    fn test_gauge_names_are_sanitized() {
        let sink = FacadeSink::new("bp");
        assert_eq!(sink.gauge_name("Audit Ingestion", "avg15"), "bp_audit_ingestion_avg15");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_pushes_snapshots_on_interval() {
        let engine = Arc::new(MetricsEngine::new());
        engine.counter("ingested").mark();
        let capture = Arc::new(CaptureSink::default());

        let handle = spawn_metrics_reporter(
            Arc::clone(&engine),
            Duration::from_secs(10),
            vec![capture.clone() as Arc<dyn MetricsSink>],
        );

        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.abort();

        let reports = capture.reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0][0].name, "ingested");
    }
}
