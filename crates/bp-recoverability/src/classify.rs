//! Failure Classification
//!
//! Classifiers look at a failed attempt and name the group it belongs to.
//! Group ids are derived from the classifier type and title, so the same
//! failure always lands in the same group across restarts and nodes.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use bp_common::{FailureGroup, ProcessingAttempt};

pub const EXCEPTION_TYPE_AND_STACK_TRACE: &str = "Exception Type and Stack Trace";
pub const MESSAGE_TYPE: &str = "Message Type";
pub const ENDPOINT_ADDRESS: &str = "Endpoint Address";

pub trait FailureClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Group title for this attempt, or `None` when the classifier does not apply.
    fn classify(&self, attempt: &ProcessingAttempt) -> Option<String>;
}

/// Groups by exception type plus the frame it was thrown from.
pub struct ExceptionTypeAndStackTraceClassifier;

impl FailureClassifier for ExceptionTypeAndStackTraceClassifier {
    fn name(&self) -> &'static str {
        EXCEPTION_TYPE_AND_STACK_TRACE
    }

    fn classify(&self, attempt: &ProcessingAttempt) -> Option<String> {
        let exception = &attempt.failure.exception;
        if exception.exception_type.is_empty() {
            return None;
        }
        Some(match first_frame(&exception.stack_trace) {
            Some(frame) => format!("{} was thrown at {}", exception.exception_type, frame),
            None => exception.exception_type.clone(),
        })
    }
}

pub struct MessageTypeClassifier;

impl FailureClassifier for MessageTypeClassifier {
    fn name(&self) -> &'static str {
        MESSAGE_TYPE
    }

    fn classify(&self, attempt: &ProcessingAttempt) -> Option<String> {
        attempt.message_metadata.message_type.clone().filter(|t| !t.is_empty())
    }
}

pub struct EndpointAddressClassifier;

impl FailureClassifier for EndpointAddressClassifier {
    fn name(&self) -> &'static str {
        ENDPOINT_ADDRESS
    }

    fn classify(&self, attempt: &ProcessingAttempt) -> Option<String> {
        let address = &attempt.failure.address_of_failing_endpoint;
        (!address.is_empty()).then(|| address.clone())
    }
}

pub fn default_classifiers() -> Vec<Arc<dyn FailureClassifier>> {
    vec![
        Arc::new(ExceptionTypeAndStackTraceClassifier),
        Arc::new(MessageTypeClassifier),
        Arc::new(EndpointAddressClassifier),
    ]
}

/// Run every classifier and collect the resulting groups.
pub fn classify(classifiers: &[Arc<dyn FailureClassifier>], attempt: &ProcessingAttempt) -> Vec<FailureGroup> {
    classifiers
        .iter()
        .filter_map(|c| {
            c.classify(attempt).map(|title| FailureGroup {
                id: group_id(c.name(), &title),
                title,
                group_type: c.name().to_string(),
            })
        })
        .collect()
}

pub fn group_id(group_type: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(group_type.as_bytes());
    hasher.update(title.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

/// First `at ...` frame of a stack trace, without the source location.
fn first_frame(stack_trace: &str) -> Option<&str> {
    stack_trace
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("at "))
        .map(|frame| match frame.find(" in ") {
            Some(idx) => &frame[..idx],
            None => frame,
        })
        .map(str::trim)
        .filter(|frame| !frame.is_empty())
}
