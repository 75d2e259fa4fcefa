//! Batch commit into the document store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use bp_common::CanonicalAuditRecord;
use bp_recoverability::{classify, FailureClassifier, RecoverabilityStore};
use bp_store::{DocumentStore, WriteOp, AUDIT_PREFIX};

use crate::factory::processing_attempt;
use crate::IngestError;

/// Commits one chunk of canonical records. An error means the chunk must be
/// treated as not committed; everything it wrote is safe to write again.
#[async_trait]
pub trait BatchCommitter: Send + Sync {
    async fn commit(&self, records: Vec<CanonicalAuditRecord>) -> Result<(), IngestError>;
}

/// Audits go in as one atomic batch; failures are merged into their failure
/// records; successful retries resolve the record they retried.
pub struct StoreCommitter {
    store: Arc<dyn DocumentStore>,
    recoverability: Arc<RecoverabilityStore>,
    classifiers: Vec<Arc<dyn FailureClassifier>>,
}

impl StoreCommitter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        recoverability: Arc<RecoverabilityStore>,
        classifiers: Vec<Arc<dyn FailureClassifier>>,
    ) -> Self {
        Self {
            store,
            recoverability,
            classifiers,
        }
    }
}

#[async_trait]
impl BatchCommitter for StoreCommitter {
    async fn commit(&self, records: Vec<CanonicalAuditRecord>) -> Result<(), IngestError> {
        let mut ops = Vec::with_capacity(records.len());
        let mut failures = Vec::new();
        let mut retried = Vec::new();

        for record in records {
            if let Some(attempt) = processing_attempt(&record) {
                failures.push((record.unique_message_id.clone(), attempt));
                continue;
            }
            if let Some(id) = record.retried_unique_message_id() {
                retried.push(id.to_string());
            }
            ops.push(WriteOp::put(format!("{}{}", AUDIT_PREFIX, record.unique_message_id), &record)?);
        }

        let audits = ops.len();
        if !ops.is_empty() {
            self.store.commit(ops).await?;
        }

        for (unique_message_id, attempt) in &failures {
            let groups = classify(&self.classifiers, attempt);
            self.recoverability
                .record_failed_attempt(unique_message_id, attempt.clone(), groups)
                .await?;
        }

        for unique_message_id in &retried {
            self.recoverability.record_successful_retry(unique_message_id).await?;
        }

        debug!(audits, failures = failures.len(), retries = retried.len(), "Batch committed");
        Ok(())
    }
}
