//! Backplane Recoverability
//!
//! Per-message failure history with bounded, deduplicated attempts, derived
//! status, retry/archive lifecycle and failure-group classification.

use thiserror::Error;

use bp_common::FailedMessageStatus;
use bp_store::StoreError;

pub mod classify;
pub mod merge;
pub mod store;

pub use classify::{classify, default_classifiers, group_id, FailureClassifier};
pub use merge::merge_attempt;
pub use store::{FailedMessageView, GroupSummary, RecoverabilityStore, RetryMarker};

#[derive(Error, Debug)]
pub enum RecoverabilityError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed message not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} message {id} while it is {from:?}")]
    InvalidTransition {
        id: String,
        from: FailedMessageStatus,
        action: &'static str,
    },
}

impl From<serde_json::Error> for RecoverabilityError {
    fn from(e: serde_json::Error) -> Self {
        RecoverabilityError::Store(StoreError::Serialization(e))
    }
}

pub type Result<T> = std::result::Result<T, RecoverabilityError>;
