//! Batch Ingestion Processor
//!
//! One long-lived loop per staging directory:
//! 1. list up to `batch_size * concurrent_batches` staged files
//! 2. split into chunks of `batch_size` and process the chunks concurrently
//! 3. per chunk: read, build canonical records, commit once, delete the
//!    committed files
//! 4. sleep `idle_delay` only when the whole cycle committed nothing
//!
//! Files that are skipped or belong to a failed chunk stay staged and are
//! picked up again later; commits are idempotent by unique message id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use bp_common::logging::component_span;
use bp_config::IngestionConfig;
use bp_metrics::{Counter, Meter, MetricsEngine};
use bp_staging::{StagedHandle, StagingCache};

use crate::circuit_breaker::RepeatedFailuresCircuitBreaker;
use crate::committer::BatchCommitter;
use crate::factory::AuditRecordFactory;
use crate::gate::IngestionGate;
use crate::health::IngestionHealth;
use crate::IngestError;

pub const INGESTED_METRIC: &str = "Audit ingestion";
pub const COMMIT_DURATION_METRIC: &str = "Audit bulk insert duration";

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    pub concurrent_batches: usize,
    pub idle_delay: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

impl From<&IngestionConfig> for ProcessorSettings {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrent_batches: config.concurrent_batches.max(1),
            idle_delay: config.idle_delay(),
        }
    }
}

/// Result of one ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub listed: usize,
    pub committed: usize,
    pub failed_chunks: usize,
}

struct ProcessorInner {
    cache: Arc<StagingCache>,
    factory: Arc<AuditRecordFactory>,
    committer: Arc<dyn BatchCommitter>,
    gate: Arc<IngestionGate>,
    breaker: Arc<RepeatedFailuresCircuitBreaker>,
    settings: ProcessorSettings,
    running: AtomicBool,
    wake: Notify,
    ingested: Counter,
    commit_duration: Meter,
}

pub struct BatchIngestionProcessor {
    inner: Arc<ProcessorInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BatchIngestionProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<StagingCache>,
        factory: Arc<AuditRecordFactory>,
        committer: Arc<dyn BatchCommitter>,
        gate: Arc<IngestionGate>,
        breaker: Arc<RepeatedFailuresCircuitBreaker>,
        metrics: &MetricsEngine,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                cache,
                factory,
                committer,
                gate,
                breaker,
                settings,
                running: AtomicBool::new(false),
                wake: Notify::new(),
                ingested: metrics.counter(INGESTED_METRIC),
                commit_duration: metrics.meter(COMMIT_DURATION_METRIC, 1000.0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Ingestion processor already running");
            return;
        }

        let settings = &self.inner.settings;
        info!(
            batch_size = settings.batch_size,
            concurrent_batches = settings.concurrent_batches,
            idle_delay_ms = settings.idle_delay.as_millis() as u64,
            "Starting batch ingestion processor"
        );

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(
            async move {
                inner.run().await;
            }
            .instrument(component_span("ingestion")),
        );
        *self.task.lock() = Some(handle);
    }

    /// Stop the loop and wait for the in-flight cycle to finish.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.wake.notify_one();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Ingestion task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run a single cycle inline.
    pub async fn process_cycle(&self) -> CycleOutcome {
        self.inner.process_cycle().await
    }

    pub fn health(&self) -> IngestionHealth {
        IngestionHealth {
            can_ingest: self.inner.gate.can_ingest(),
            free_space_percentage: self.inner.gate.free_percentage(),
            breaker_state: self.inner.breaker.state(),
            staged_backlog: self.inner.cache.count().ok(),
            running: self.is_running(),
        }
    }
}

impl ProcessorInner {
    async fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            let outcome = self.process_cycle().await;

            if self.breaker.is_tripped() {
                error!("Circuit breaker tripped, stopping ingestion");
                self.running.store(false, Ordering::SeqCst);
                break;
            }

            if outcome.committed == 0 && self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.idle_delay) => {}
                    _ = self.wake.notified() => {}
                }
            }
        }
        info!("Batch ingestion processor stopped");
    }

    async fn process_cycle(&self) -> CycleOutcome {
        let max = self.settings.batch_size * self.settings.concurrent_batches;
        let handles: Vec<StagedHandle> = match self.cache.list_batch(max) {
            Ok(iter) => iter.collect(),
            Err(e) => {
                error!(error = %e, "Failed to list staged records");
                return CycleOutcome::default();
            }
        };

        let mut outcome = CycleOutcome {
            listed: handles.len(),
            ..Default::default()
        };
        if handles.is_empty() {
            return outcome;
        }

        let chunks: Vec<Vec<StagedHandle>> = handles
            .chunks(self.settings.batch_size)
            .map(<[StagedHandle]>::to_vec)
            .collect();

        let results = join_all(chunks.into_iter().map(|chunk| self.process_chunk(chunk))).await;
        for result in results {
            match result {
                Ok(0) => {}
                Ok(committed) => {
                    outcome.committed += committed;
                    self.breaker.record_success();
                }
                Err(e) => {
                    outcome.failed_chunks += 1;
                    error!(error = %e, "Failed to ingest chunk; records stay staged");
                    counter!("bp_ingest_chunk_failures_total").increment(1);
                    self.breaker.record_failure(&e);
                }
            }
        }

        debug!(
            listed = outcome.listed,
            committed = outcome.committed,
            failed_chunks = outcome.failed_chunks,
            "Ingestion cycle complete"
        );
        outcome
    }

    async fn process_chunk(&self, handles: Vec<StagedHandle>) -> Result<usize, IngestError> {
        if !self.gate.can_ingest() {
            debug!(files = handles.len(), "Ingestion gate closed, skipping chunk");
            return Ok(0);
        }

        let cache = Arc::clone(&self.cache);
        let staged = tokio::task::spawn_blocking(move || {
            handles
                .into_iter()
                .filter_map(|handle| cache.try_read(&handle).map(|record| (handle, record)))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))?;

        if staged.is_empty() {
            return Ok(0);
        }

        let mut committed_handles = Vec::with_capacity(staged.len());
        let mut records = Vec::with_capacity(staged.len());
        for (handle, record) in staged {
            records.push(self.factory.build(record).await);
            committed_handles.push(handle);
        }

        let count = records.len();
        let started = Instant::now();
        self.committer.commit(records).await?;
        self.commit_duration.mark(started.elapsed().as_micros() as i64);

        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || {
            for handle in &committed_handles {
                if let Err(e) = cache.delete(handle) {
                    // committed already; a leftover file is re-ingested idempotently
                    warn!(id = %handle.id, error = %e, "Failed to delete committed staged record");
                }
            }
        })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))?;

        self.ingested.mark_many(count as i64);
        counter!("bp_ingest_records_total").increment(count as u64);
        Ok(count)
    }
}
