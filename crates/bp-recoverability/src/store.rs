//! Recoverability Store
//!
//! Owns the `failed/<unique id>` documents. Every mutation is a
//! read-merge-write under optimistic concurrency, so concurrent attempts
//! for the same message are linearized by the document store rather than
//! by a lock in this process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bp_common::{FailedMessageStatus, FailureGroup, FailureRecord, MessageStatus, ProcessingAttempt};
use bp_store::{update_with_retry, DocumentStore, WriteOp, FAILED_PREFIX, RETRY_PREFIX};

use crate::merge::merge_attempt;
use crate::{RecoverabilityError, Result};

/// Pending retry marker, removed once the retry succeeds or the message is archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryMarker {
    pub unique_message_id: String,
    pub requested_at: DateTime<Utc>,
}

/// Read-side projection of a failure record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMessageView {
    pub unique_message_id: String,
    pub status: MessageStatus,
    pub attempt_count: usize,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub exception_type: Option<String>,
    pub exception_message: Option<String>,
    pub message_type: Option<String>,
    pub receiving_endpoint: Option<String>,
    pub failure_groups: Vec<FailureGroup>,
}

impl From<&FailureRecord> for FailedMessageView {
    fn from(record: &FailureRecord) -> Self {
        let last = record.last_attempt();
        Self {
            unique_message_id: record.unique_message_id.clone(),
            status: record.derived_status(),
            attempt_count: record.attempts.len(),
            last_attempted_at: last.map(|a| a.attempted_at),
            exception_type: last.map(|a| a.failure.exception.exception_type.clone()),
            exception_message: last.map(|a| a.failure.exception.message.clone()),
            message_type: last.and_then(|a| a.message_metadata.message_type.clone()),
            receiving_endpoint: last.map(|a| a.failure.address_of_failing_endpoint.clone()),
            failure_groups: record.failure_groups.clone(),
        }
    }
}

/// Unresolved failures per group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub group: FailureGroup,
    pub count: usize,
    pub first_failure: DateTime<Utc>,
    pub last_failure: DateTime<Utc>,
}

pub struct RecoverabilityStore {
    store: Arc<dyn DocumentStore>,
    max_processing_attempts: usize,
    max_merge_retries: u32,
}

fn failed_id(unique_message_id: &str) -> String {
    format!("{}{}", FAILED_PREFIX, unique_message_id)
}

fn retry_id(unique_message_id: &str) -> String {
    format!("{}{}", RETRY_PREFIX, unique_message_id)
}

impl RecoverabilityStore {
    pub fn new(store: Arc<dyn DocumentStore>, max_processing_attempts: usize, max_merge_retries: u32) -> Self {
        Self {
            store,
            max_processing_attempts: max_processing_attempts.max(1),
            max_merge_retries,
        }
    }

    /// Upsert a failed attempt. Creates the record on first failure; on later
    /// failures merges the attempt and resets status and groups.
    pub async fn record_failed_attempt(
        &self,
        unique_message_id: &str,
        attempt: ProcessingAttempt,
        failure_groups: Vec<FailureGroup>,
    ) -> Result<FailureRecord> {
        let max = self.max_processing_attempts;
        let record = update_with_retry::<FailureRecord, _>(
            self.store.as_ref(),
            &failed_id(unique_message_id),
            self.max_merge_retries,
            |existing| {
                let mut record = existing.unwrap_or_else(|| FailureRecord {
                    unique_message_id: unique_message_id.to_string(),
                    attempts: Vec::new(),
                    status: FailedMessageStatus::Unresolved,
                    failure_groups: Vec::new(),
                });
                merge_attempt(&mut record.attempts, attempt.clone(), max);
                record.status = FailedMessageStatus::Unresolved;
                record.failure_groups = failure_groups.clone();
                Some(record)
            },
        )
        .await?;

        let record = record.ok_or_else(|| RecoverabilityError::NotFound(unique_message_id.to_string()))?;
        debug!(
            unique_message_id = %unique_message_id,
            attempts = record.attempts.len(),
            "Failed attempt recorded"
        );
        Ok(record)
    }

    /// Mark a failure as resolved after a successful retry and drop its retry
    /// marker. Returns false when no failure record exists.
    pub async fn record_successful_retry(&self, unique_message_id: &str) -> Result<bool> {
        let updated = update_with_retry::<FailureRecord, _>(
            self.store.as_ref(),
            &failed_id(unique_message_id),
            self.max_merge_retries,
            |existing| {
                existing.map(|mut record| {
                    record.status = FailedMessageStatus::Resolved;
                    record
                })
            },
        )
        .await?;

        self.store.commit(vec![WriteOp::delete(retry_id(unique_message_id))]).await?;

        match updated {
            Some(_) => {
                info!(unique_message_id = %unique_message_id, "Failed message resolved by retry");
                Ok(true)
            }
            None => {
                debug!(unique_message_id = %unique_message_id, "Successful retry for unknown failure");
                Ok(false)
            }
        }
    }

    /// Flag a failure for retry and write its pending-retry marker.
    pub async fn request_retry(&self, unique_message_id: &str) -> Result<()> {
        self.transition(unique_message_id, "retry", |status| match status {
            FailedMessageStatus::Unresolved | FailedMessageStatus::RetryIssued => {
                Some(FailedMessageStatus::RetryIssued)
            }
            _ => None,
        })
        .await?;

        let marker = RetryMarker {
            unique_message_id: unique_message_id.to_string(),
            requested_at: Utc::now(),
        };
        self.store
            .commit(vec![WriteOp::put(retry_id(unique_message_id), &marker)?])
            .await?;

        info!(unique_message_id = %unique_message_id, "Retry requested");
        Ok(())
    }

    pub async fn archive(&self, unique_message_id: &str) -> Result<()> {
        self.transition(unique_message_id, "archive", |status| match status {
            FailedMessageStatus::Resolved => None,
            _ => Some(FailedMessageStatus::Archived),
        })
        .await?;
        self.store.commit(vec![WriteOp::delete(retry_id(unique_message_id))]).await?;
        info!(unique_message_id = %unique_message_id, "Failed message archived");
        Ok(())
    }

    pub async fn unarchive(&self, unique_message_id: &str) -> Result<()> {
        self.transition(unique_message_id, "unarchive", |status| match status {
            FailedMessageStatus::Archived => Some(FailedMessageStatus::Unresolved),
            _ => None,
        })
        .await?;
        info!(unique_message_id = %unique_message_id, "Failed message unarchived");
        Ok(())
    }

    /// Archive every unresolved failure in a group. Returns how many were archived.
    pub async fn archive_group(&self, group_id: &str) -> Result<usize> {
        let mut archived = 0;
        for record in self.load_all().await? {
            if !record.in_group(group_id) || record.status != FailedMessageStatus::Unresolved {
                continue;
            }
            match self.archive(&record.unique_message_id).await {
                Ok(()) => archived += 1,
                // status changed underneath us; leave it
                Err(RecoverabilityError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        info!(group_id = %group_id, archived, "Failure group archived");
        Ok(archived)
    }

    pub async fn get(&self, unique_message_id: &str) -> Result<Option<FailureRecord>> {
        match self.store.get(&failed_id(unique_message_id)).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn get_view(&self, unique_message_id: &str) -> Result<Option<FailedMessageView>> {
        Ok(self.get(unique_message_id).await?.as_ref().map(FailedMessageView::from))
    }

    pub async fn list_group(&self, group_id: &str) -> Result<Vec<FailedMessageView>> {
        Ok(self
            .load_all()
            .await?
            .iter()
            .filter(|r| r.in_group(group_id))
            .map(FailedMessageView::from)
            .collect())
    }

    /// Unresolved failure counts per group, largest first.
    pub async fn group_summaries(&self) -> Result<Vec<GroupSummary>> {
        let mut groups: HashMap<String, GroupSummary> = HashMap::new();
        for record in self.load_all().await? {
            if record.status != FailedMessageStatus::Unresolved {
                continue;
            }
            let Some(last) = record.last_attempt() else {
                continue;
            };
            let at = last.failure.time_of_failure;
            for group in &record.failure_groups {
                groups
                    .entry(group.id.clone())
                    .and_modify(|s| {
                        s.count += 1;
                        s.first_failure = s.first_failure.min(at);
                        s.last_failure = s.last_failure.max(at);
                    })
                    .or_insert_with(|| GroupSummary {
                        group: group.clone(),
                        count: 1,
                        first_failure: at,
                        last_failure: at,
                    });
            }
        }

        let mut summaries: Vec<GroupSummary> = groups.into_values().collect();
        summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.group.title.cmp(&b.group.title)));
        Ok(summaries)
    }

    pub async fn pending_retries(&self) -> Result<Vec<RetryMarker>> {
        self.store
            .list_prefix(RETRY_PREFIX)
            .await?
            .iter()
            .map(|doc| doc.decode().map_err(RecoverabilityError::from))
            .collect()
    }

    async fn load_all(&self) -> Result<Vec<FailureRecord>> {
        let docs = self.store.list_prefix(FAILED_PREFIX).await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            match doc.decode::<FailureRecord>() {
                Ok(record) => records.push(record),
                Err(e) => warn!(id = %doc.id, error = %e, "Skipping undecodable failure record"),
            }
        }
        Ok(records)
    }

    /// Apply a status transition. `next` returns `None` when the transition
    /// is not allowed from the current status.
    async fn transition<F>(&self, unique_message_id: &str, action: &'static str, next: F) -> Result<FailureRecord>
    where
        F: Fn(FailedMessageStatus) -> Option<FailedMessageStatus> + Send + Sync,
    {
        let mut rejected: Option<FailedMessageStatus> = None;
        let updated = update_with_retry::<FailureRecord, _>(
            self.store.as_ref(),
            &failed_id(unique_message_id),
            self.max_merge_retries,
            |existing| {
                let mut record = existing?;
                match next(record.status) {
                    Some(status) => {
                        rejected = None;
                        record.status = status;
                        Some(record)
                    }
                    None => {
                        rejected = Some(record.status);
                        None
                    }
                }
            },
        )
        .await?;

        match (updated, rejected) {
            (Some(record), _) => Ok(record),
            (None, Some(from)) => Err(RecoverabilityError::InvalidTransition {
                id: unique_message_id.to_string(),
                from,
                action,
            }),
            (None, None) => Err(RecoverabilityError::NotFound(unique_message_id.to_string())),
        }
    }
}
