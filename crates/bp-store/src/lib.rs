//! Backplane Document Store
//!
//! Narrow persistence contract used by ingestion and recoverability:
//! - atomic batch put/delete of opaque JSON documents keyed by string id
//! - conditional write (write-if-version) for optimistic concurrency
//! - lookup by id and by id prefix
//!
//! Backends: in-memory (tests, single node) and SQLite (`sqlite` feature).

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryDocumentStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDocumentStore;

/// Id prefix of canonical audit documents.
pub const AUDIT_PREFIX: &str = "audit/";
/// Id prefix of failure records.
pub const FAILED_PREFIX: &str = "failed/";
/// Id prefix of pending-retry markers.
pub const RETRY_PREFIX: &str = "retries/";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Version conflict on document {0}")]
    Conflict(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored document with its current version. Versions start at 1 and
/// increase by one on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: serde_json::Value,
    pub version: u64,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// One operation of an atomic commit.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put { id: String, body: serde_json::Value },
    Delete { id: String },
}

impl WriteOp {
    pub fn put<T: Serialize>(id: impl Into<String>, value: &T) -> Result<Self> {
        Ok(WriteOp::Put {
            id: id.into(),
            body: serde_json::to_value(value)?,
        })
    }

    pub fn delete(id: impl Into<String>) -> Self {
        WriteOp::Delete { id: id.into() }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Put { id, .. } | WriteOp::Delete { id } => id,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create tables/indexes if the backend needs them.
    async fn init_schema(&self) -> Result<()>;

    /// Apply all operations atomically: either every op is visible or none is.
    /// Puts overwrite unconditionally.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Write `body` only if the stored version equals `expected`
    /// (`None` meaning the document must not exist yet). Returns the new
    /// version, or `StoreError::Conflict` when the precondition fails.
    async fn put_if_version(
        &self,
        id: &str,
        body: serde_json::Value,
        expected: Option<u64>,
    ) -> Result<u64>;

    /// All documents whose id starts with `prefix`, ordered by id.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Document>>;
}

/// Optimistic read-modify-write of one document.
///
/// `apply` receives the current value (if any) and returns the value to
/// write, or `None` to leave the document untouched. On a version conflict
/// the document is re-read and `apply` runs again, up to `max_retries`
/// times with jittered backoff.
pub async fn update_with_retry<T, F>(
    store: &dyn DocumentStore,
    id: &str,
    max_retries: u32,
    mut apply: F,
) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned + Send,
    F: FnMut(Option<T>) -> Option<T> + Send,
{
    let mut attempt: u32 = 0;
    loop {
        let current = store.get(id).await?;
        let (existing, version) = match current {
            Some(doc) => (Some(doc.decode::<T>()?), Some(doc.version)),
            None => (None, None),
        };

        let Some(updated) = apply(existing) else {
            return Ok(None);
        };

        let body = serde_json::to_value(&updated)?;
        match store.put_if_version(id, body, version).await {
            Ok(new_version) => {
                debug!(id = %id, version = new_version, retries = attempt, "Document updated");
                return Ok(Some(updated));
            }
            Err(StoreError::Conflict(_)) if attempt < max_retries => {
                attempt += 1;
                let delay = backoff(attempt);
                debug!(id = %id, attempt, delay_ms = delay.as_millis() as u64, "Version conflict, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(StoreError::Conflict(_)) => {
                warn!(id = %id, retries = attempt, "Giving up after repeated version conflicts");
                return Err(StoreError::Conflict(id.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let base = 2u64.saturating_mul(u64::from(attempt.min(8)));
    let jitter = rand::rng().random_range(0..=base.max(1));
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_is_bounded() {
        for attempt in 1..50 {
            let delay = backoff(attempt);
            let base = 2 * u64::from(attempt.min(8));
            assert!(delay.as_millis() as u64 >= base);
            assert!(delay.as_millis() as u64 <= base * 2);
        }
    }

    #[test]
    fn test_write_op_id() {
        let op = WriteOp::put("audit/1", &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(op.id(), "audit/1");
        assert_eq!(WriteOp::delete("x").id(), "x");
    }
}
