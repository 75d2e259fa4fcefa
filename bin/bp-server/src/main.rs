//! Backplane Server
//!
//! Runs the ingestion pipeline over the local staging directory, plus the
//! recoverability store, subscription directory and metrics reporting.
//!
//! ## Configuration
//!
//! Loaded from `backplane.toml` (or `BACKPLANE_CONFIG`), then overridden by
//! `BACKPLANE_*` environment variables.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BACKPLANE_CONFIG` | - | Explicit config file path |
//! | `BACKPLANE_STORE_BACKEND` | `sqlite` | `sqlite` or `memory` |
//! | `BACKPLANE_STORE_URL` | `sqlite://./data/backplane.db?mode=rwc` | SQLite URL |
//! | `BACKPLANE_PROMETHEUS_PORT` | - | Expose Prometheus metrics on this port |
//! | `LOG_FORMAT` | `text` | `json` for structured output |
//! | `RUST_LOG` | `info` | Log level |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use bp_config::{AppConfig, ConfigLoader};
use bp_ingest::{
    AuditRecordFactory, BatchIngestionProcessor, DiskSpaceMonitor, IngestionGate, ProcessorSettings,
    RepeatedFailuresCircuitBreaker, StoreCommitter,
};
use bp_metrics::{spawn_metrics_reporter, FacadeSink, LogSink, MetricsEngine, MetricsSink};
use bp_recoverability::{default_classifiers, RecoverabilityStore};
use bp_staging::{BodyStorage, FileBodyStorage, StagingCache};
use bp_store::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};
use bp_subscriptions::{MemorySubscriptionLog, SqliteSubscriptionLog, SubscriptionDirectory, SubscriptionLog};

#[tokio::main]
async fn main() -> Result<()> {
    bp_common::logging::init_logging("bp-server");

    info!("Starting Backplane server");

    let config = ConfigLoader::new().load().context("Failed to load configuration")?;
    std::fs::create_dir_all(&config.data_dir.0)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.0.display()))?;

    // Fatal errors (tripped breaker) and Ctrl+C both end up here
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<String>(4);

    // Metrics
    let metrics = Arc::new(MetricsEngine::new());
    if let Some(port) = config.metrics.prometheus_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }
    let reporter_handle = if config.metrics.enabled {
        let sinks: Vec<Arc<dyn MetricsSink>> = vec![Arc::new(LogSink), Arc::new(FacadeSink::new("bp"))];
        Some(spawn_metrics_reporter(
            Arc::clone(&metrics),
            config.metrics.report_interval(),
            sinks,
        ))
    } else {
        None
    };

    // Durable store and subscription log
    let (store, subscription_log) = create_backends(&config).await?;
    info!(backend = %config.store.backend, "Document store initialized");

    // Subscriptions are rebuilt eagerly so the first lookup is not slowed down
    let subscriptions = Arc::new(SubscriptionDirectory::new(subscription_log));
    subscriptions
        .initialize()
        .await
        .context("Failed to build subscription directory")?;
    info!(message_types = subscriptions.message_types().len(), "Subscription directory ready");

    // Staging and backpressure
    let cache = Arc::new(StagingCache::open(config.staging_path()).context("Failed to open staging cache")?);
    let bodies: Arc<dyn BodyStorage> = Arc::new(
        FileBodyStorage::open(config.body_path())
            .await
            .context("Failed to open body storage")?,
    );

    let gate = Arc::new(IngestionGate::new());
    let monitor = DiskSpaceMonitor::new(
        config.data_dir.0.clone(),
        config.disk.minimum_free_percentage,
        config.disk.check_interval(),
        Arc::clone(&gate),
    );
    if let Err(e) = monitor.check() {
        warn!(error = %e, "Initial disk space check failed");
    }
    let monitor_handle = monitor.spawn();

    // Ingestion
    let recoverability = Arc::new(RecoverabilityStore::new(
        Arc::clone(&store),
        config.recoverability.max_processing_attempts,
        config.recoverability.max_merge_retries,
    ));
    let committer = Arc::new(StoreCommitter::new(
        Arc::clone(&store),
        Arc::clone(&recoverability),
        default_classifiers(),
    ));

    let fatal_tx = shutdown_tx.clone();
    let breaker = Arc::new(RepeatedFailuresCircuitBreaker::new(
        "audit-ingestion",
        config.ingestion.circuit_breaker_threshold,
        config.ingestion.circuit_breaker_window(),
        Arc::new(move |reason: &str| {
            let _ = fatal_tx.send(reason.to_string());
        }),
    ));

    let processor = BatchIngestionProcessor::new(
        Arc::clone(&cache),
        Arc::new(AuditRecordFactory::new(
            Some(bodies),
            config.staging.max_body_size_to_inline,
        )),
        committer,
        gate,
        breaker,
        &metrics,
        ProcessorSettings::from(&config.ingestion),
    );
    processor.start();

    info!(
        staging = %config.staging_path().display(),
        backlog = cache.count().unwrap_or_default(),
        "Backplane server started"
    );
    info!("Press Ctrl+C to shutdown");

    let fatal = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received...");
            None
        }
        reason = shutdown_rx.recv() => reason.ok(),
    };

    if let Err(e) = tokio::time::timeout(Duration::from_secs(30), processor.stop()).await {
        warn!(error = %e, "Timed out waiting for ingestion to stop");
    }
    monitor_handle.abort();
    if let Some(handle) = reporter_handle {
        handle.abort();
    }

    match fatal {
        Some(reason) => {
            error!(reason = %reason, "Backplane server stopped after a fatal error");
            Err(anyhow::anyhow!("fatal ingestion failure: {}", reason))
        }
        None => {
            info!("Backplane server shutdown complete");
            Ok(())
        }
    }
}

async fn create_backends(config: &AppConfig) -> Result<(Arc<dyn DocumentStore>, Arc<dyn SubscriptionLog>)> {
    match config.store.backend.as_str() {
        "memory" => {
            warn!("Using in-memory store; nothing survives a restart");
            Ok((
                Arc::new(MemoryDocumentStore::new()),
                Arc::new(MemorySubscriptionLog::new()),
            ))
        }
        _ => {
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&config.store.url)
                .await
                .with_context(|| format!("Failed to connect to {}", config.store.url))?;

            let store = SqliteDocumentStore::new(pool.clone());
            store.init_schema().await?;
            let log = SqliteSubscriptionLog::new(pool);
            log.init_schema().await?;

            Ok((Arc::new(store), Arc::new(log)))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
