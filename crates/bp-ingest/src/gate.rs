//! Disk-space backpressure
//!
//! `IngestionGate` is the "can ingest more" flag consulted by the processor.
//! `DiskSpaceMonitor` recomputes it on a fixed interval from the free space
//! of the volume holding the data directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn, Instrument};

use bp_common::logging::component_span;

pub struct IngestionGate {
    allowed: AtomicBool,
    /// f64 bits of the last measured free percentage; NaN until measured
    free_percentage: AtomicU64,
}

impl Default for IngestionGate {
    fn default() -> Self {
        Self {
            allowed: AtomicBool::new(true),
            free_percentage: AtomicU64::new(f64::NAN.to_bits()),
        }
    }
}

impl IngestionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_ingest(&self) -> bool {
        self.allowed.load(Ordering::Acquire)
    }

    pub fn set_allowed(&self, allowed: bool) {
        let previous = self.allowed.swap(allowed, Ordering::AcqRel);
        if previous != allowed {
            if allowed {
                info!("Ingestion gate opened");
            } else {
                warn!("Ingestion gate closed");
            }
        }
    }

    pub fn free_percentage(&self) -> Option<f64> {
        let value = f64::from_bits(self.free_percentage.load(Ordering::Acquire));
        (!value.is_nan()).then_some(value)
    }

    fn record_free_percentage(&self, percentage: f64) {
        self.free_percentage.store(percentage.to_bits(), Ordering::Release);
    }
}

/// Percentage of `total` that is available; zero-sized volumes count as full.
pub fn free_percentage(available: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    available as f64 / total as f64 * 100.0
}

pub struct DiskSpaceMonitor {
    path: PathBuf,
    minimum_free_percentage: f64,
    check_interval: Duration,
    gate: Arc<IngestionGate>,
}

impl DiskSpaceMonitor {
    pub fn new(
        path: impl Into<PathBuf>,
        minimum_free_percentage: f64,
        check_interval: Duration,
        gate: Arc<IngestionGate>,
    ) -> Self {
        Self {
            path: path.into(),
            minimum_free_percentage,
            check_interval,
            gate,
        }
    }

    /// Measure once and update the gate. Returns the free percentage.
    pub fn check(&self) -> std::io::Result<f64> {
        let available = fs2::available_space(&self.path)?;
        let total = fs2::total_space(&self.path)?;
        let percentage = free_percentage(available, total);

        self.gate.record_free_percentage(percentage);
        let allowed = percentage >= self.minimum_free_percentage;
        if !allowed {
            warn!(
                path = %self.path.display(),
                free_percentage = percentage,
                minimum = self.minimum_free_percentage,
                "Free disk space below threshold"
            );
        }
        self.gate.set_allowed(allowed);
        Ok(percentage)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                info!(
                    path = %self.path.display(),
                    interval_secs = self.check_interval.as_secs(),
                    minimum = self.minimum_free_percentage,
                    "Starting disk space monitor"
                );
                let mut ticker = interval(self.check_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if let Err(e) = self.check() {
                        error!(path = %self.path.display(), error = %e, "Disk space check failed");
                    }
                }
            }
            .instrument(component_span("disk-monitor")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_free_percentage() {
        assert_eq!(free_percentage(5, 100), 5.0);
        assert_eq!(free_percentage(0, 0), 0.0);
    }

    #[test]
    fn test_gate_starts_open() {
        let gate = IngestionGate::new();
        assert!(gate.can_ingest());
        assert!(gate.free_percentage().is_none());
        gate.set_allowed(false);
        assert!(!gate.can_ingest());
    }

    #[test]
    fn test_threshold_controls_gate() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(IngestionGate::new());

        let impossible = DiskSpaceMonitor::new(dir.path(), 100.1, Duration::from_secs(5), gate.clone());
        impossible.check().unwrap();
        assert!(!gate.can_ingest());
        assert!(gate.free_percentage().is_some());

        let lenient = DiskSpaceMonitor::new(dir.path(), 0.0, Duration::from_secs(5), gate.clone());
        lenient.check().unwrap();
        assert!(gate.can_ingest());
    }
}
