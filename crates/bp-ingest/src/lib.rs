//! Backplane Ingestion
//!
//! Moves staged records into the document store:
//! - `BatchIngestionProcessor`: the batch loop with bounded concurrent chunks
//! - `AuditRecordFactory`: staged record -> canonical audit record
//! - `StoreCommitter`: audit batch commit plus failure/retry bookkeeping
//! - `IngestionGate` / `DiskSpaceMonitor`: disk-space backpressure
//! - `RepeatedFailuresCircuitBreaker`: escalates repeated commit failures

use thiserror::Error;

pub mod circuit_breaker;
pub mod committer;
pub mod factory;
pub mod gate;
pub mod health;
pub mod processor;

pub use circuit_breaker::{BreakerState, FatalCallback, RepeatedFailuresCircuitBreaker};
pub use committer::{BatchCommitter, StoreCommitter};
pub use factory::AuditRecordFactory;
pub use gate::{DiskSpaceMonitor, IngestionGate};
pub use health::IngestionHealth;
pub use processor::{BatchIngestionProcessor, CycleOutcome, ProcessorSettings};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Staging error: {0}")]
    Staging(#[from] bp_staging::StagingError),

    #[error("Store error: {0}")]
    Store(#[from] bp_store::StoreError),

    #[error("Recoverability error: {0}")]
    Recoverability(#[from] bp_recoverability::RecoverabilityError),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Commit rejected: {0}")]
    Rejected(String),
}
