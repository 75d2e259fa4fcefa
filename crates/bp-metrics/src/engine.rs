//! Metrics Engine
//!
//! Process-wide registry of named counters and meters. Each metric is
//! created lazily on first use and lives until the engine is dropped. Handles
//! are cheap clones of the registered entry, so hot paths look a metric up
//! once and then mark it without touching the registry.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use crate::rolling::RollingAccumulator;

/// Windows reported by `get_values`, in seconds.
pub const WINDOWS: [i64; 3] = [15, 60, 300];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricKind {
    /// Reports events per second.
    Counter,
    /// Reports the average marked value, divided by `scale`.
    Meter { scale: f64 },
}

/// Snapshot of one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValues {
    pub name: String,
    /// Value for the last completed second
    pub current: f64,
    pub avg15: f64,
    pub avg60: f64,
    pub avg300: f64,
}

struct Metric {
    name: String,
    kind: MetricKind,
    acc: RollingAccumulator,
}

impl Metric {
    fn value(&self, now: i64, seconds: i64) -> f64 {
        let totals = self.acc.window_at(now, seconds);
        match self.kind {
            MetricKind::Counter => totals.total as f64 / seconds as f64,
            MetricKind::Meter { scale } => {
                if totals.count == 0 {
                    0.0
                } else {
                    totals.total as f64 / totals.count as f64 / scale
                }
            }
        }
    }

    fn snapshot(&self, now: i64) -> MetricValues {
        let current = match self.kind {
            MetricKind::Counter => self.acc.window_at(now, 1).total as f64,
            MetricKind::Meter { .. } => self.value(now, 1),
        };
        MetricValues {
            name: self.name.clone(),
            current,
            avg15: self.value(now, WINDOWS[0]),
            avg60: self.value(now, WINDOWS[1]),
            avg300: self.value(now, WINDOWS[2]),
        }
    }
}

/// Handle to a counter. Marking is lock-free.
#[derive(Clone)]
pub struct Counter(Arc<Metric>);

impl Counter {
    pub fn mark(&self) {
        self.mark_many(1);
    }

    pub fn mark_many(&self, events: i64) {
        self.0.acc.mark_at(unix_seconds(), events);
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

/// Handle to a meter. Marking is lock-free.
#[derive(Clone)]
pub struct Meter(Arc<Metric>);

impl Meter {
    pub fn mark(&self, value: i64) {
        self.0.acc.mark_at(unix_seconds(), value);
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

fn unix_seconds() -> i64 {
    Utc::now().timestamp()
}

#[derive(Default)]
pub struct MetricsEngine {
    metrics: DashMap<String, Arc<Metric>>,
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Counter {
        Counter(self.get_or_create(name, MetricKind::Counter))
    }

    /// Meter whose reported averages are divided by `scale`
    /// (e.g. mark microseconds with scale 1000 to report milliseconds).
    pub fn meter(&self, name: &str, scale: f64) -> Meter {
        let scale = if scale > 0.0 { scale } else { 1.0 };
        Meter(self.get_or_create(name, MetricKind::Meter { scale }))
    }

    fn get_or_create(&self, name: &str, kind: MetricKind) -> Arc<Metric> {
        if let Some(existing) = self.metrics.get(name) {
            if existing.kind != kind {
                warn!(metric = %name, "Metric requested with a different kind; keeping the original");
            }
            return Arc::clone(existing.value());
        }

        let entry = self.metrics.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Metric {
                name: name.to_string(),
                kind,
                acc: RollingAccumulator::new(),
            })
        });
        Arc::clone(entry.value())
    }

    pub fn get_values(&self) -> Vec<MetricValues> {
        self.values_at(unix_seconds())
    }

    /// Snapshot as seen at `now` (unix seconds), sorted by name.
    pub fn values_at(&self, now: i64) -> Vec<MetricValues> {
        let mut values: Vec<MetricValues> = self
            .metrics
            .iter()
            .map(|entry| entry.value().snapshot(now))
            .collect();
        values.sort_by(|a, b| a.name.cmp(&b.name));
        values
    }

    #[cfg(test)]
    pub(crate) fn mark_at(&self, name: &str, now: i64, value: i64) {
        if let Some(metric) = self.metrics.get(name) {
            metric.acc.mark_at(now, value);
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
