use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod headers;
pub mod logging;

/// Header map carried by every inbound record. Order is irrelevant.
pub type Headers = HashMap<String, String>;

// ============================================================================
// Staged Records
// ============================================================================

/// Pointer to a message body that may have been stored out of band.
///
/// When `stored` is false the body was not captured and only the metadata
/// (content type, size) is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCheck {
    pub stored: bool,
    pub message_id: String,
    pub content_type: String,
    pub size: i32,
}

/// A record as it sits in the staging cache: headers plus claim check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedRecord {
    pub headers: Headers,
    pub claim_check: ClaimCheck,
}

// ============================================================================
// Canonical Records
// ============================================================================

/// Metadata computed from the headers of a processed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub message_id: String,
    pub message_intent: String,
    pub message_type: Option<String>,
    pub is_system_message: bool,
    pub sending_endpoint: Option<String>,
    pub receiving_endpoint: Option<String>,
    pub conversation_id: Option<String>,
    pub time_sent: Option<DateTime<Utc>>,
    pub processing_started: Option<DateTime<Utc>>,
    pub processing_ended: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub critical_time_ms: Option<i64>,
    pub content_type: String,
    pub body_size: i32,
    /// All header values joined by spaces, used for free-text search.
    pub searchable_headers: String,
    pub processed_at: DateTime<Utc>,
}

/// Exception captured by the endpoint that failed to process a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub exception_type: String,
    pub message: String,
    pub source: Option<String>,
    pub stack_trace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetails {
    pub exception: ExceptionDetails,
    pub time_of_failure: DateTime<Utc>,
    pub address_of_failing_endpoint: String,
}

/// Canonical form of a staged record, ready to be committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAuditRecord {
    pub unique_message_id: String,
    pub headers: Headers,
    pub metadata: MessageMetadata,
    pub body: Option<String>,
    /// Set when the record reports a failed processing attempt.
    pub failure: Option<FailureDetails>,
}

impl CanonicalAuditRecord {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Unique id of the failure record this message is a successful retry of.
    pub fn retried_unique_message_id(&self) -> Option<&str> {
        self.headers
            .get(headers::RETRY_UNIQUE_MESSAGE_ID)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

// ============================================================================
// Failure Records
// ============================================================================

/// One failed attempt to process a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingAttempt {
    pub attempted_at: DateTime<Utc>,
    pub headers: Headers,
    pub failure: FailureDetails,
    pub message_metadata: MessageMetadata,
}

/// Stored status of a failure record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailedMessageStatus {
    #[default]
    Unresolved,
    Resolved,
    RetryIssued,
    Archived,
}

/// Status presented to readers, derived from the stored status and history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Failed,
    RepeatedFailure,
    RetryIssued,
    Resolved,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureGroup {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub group_type: String,
}

/// Per-message failure history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub unique_message_id: String,
    pub attempts: Vec<ProcessingAttempt>,
    pub status: FailedMessageStatus,
    pub failure_groups: Vec<FailureGroup>,
}

impl FailureRecord {
    pub fn last_attempt(&self) -> Option<&ProcessingAttempt> {
        self.attempts.last()
    }

    /// Status as seen by read-side projections.
    pub fn derived_status(&self) -> MessageStatus {
        match self.status {
            FailedMessageStatus::Archived => MessageStatus::Archived,
            FailedMessageStatus::Resolved => MessageStatus::Resolved,
            FailedMessageStatus::RetryIssued => MessageStatus::RetryIssued,
            FailedMessageStatus::Unresolved if self.attempts.len() > 1 => {
                MessageStatus::RepeatedFailure
            }
            FailedMessageStatus::Unresolved => MessageStatus::Failed,
        }
    }

    pub fn in_group(&self, group_id: &str) -> bool {
        self.failure_groups.iter().any(|g| g.id == group_id)
    }
}

// ============================================================================
// Wire Timestamps
// ============================================================================

const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S:%6f Z";

/// Parse a header timestamp (`yyyy-MM-dd HH:mm:ss:ffffff Z`, or RFC 3339).
pub fn parse_wire_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, WIRE_TIME_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_wire_time(time: DateTime<Utc>) -> String {
    time.format(WIRE_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attempt(at: DateTime<Utc>) -> ProcessingAttempt {
        ProcessingAttempt {
            attempted_at: at,
            headers: Headers::new(),
            failure: FailureDetails {
                exception: ExceptionDetails {
                    exception_type: "System.Exception".to_string(),
                    message: "boom".to_string(),
                    source: None,
                    stack_trace: String::new(),
                },
                time_of_failure: at,
                address_of_failing_endpoint: "sales".to_string(),
            },
            message_metadata: MessageMetadata {
                message_id: "m1".to_string(),
                message_intent: "Send".to_string(),
                message_type: None,
                is_system_message: false,
                sending_endpoint: None,
                receiving_endpoint: None,
                conversation_id: None,
                time_sent: None,
                processing_started: None,
                processing_ended: None,
                processing_time_ms: None,
                critical_time_ms: None,
                content_type: "application/json".to_string(),
                body_size: 0,
                searchable_headers: String::new(),
                processed_at: at,
            },
        }
    }

    #[test]
    fn test_wire_time_round_trip() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let formatted = format_wire_time(time);
        assert_eq!(formatted, "2024-03-09 14:05:07:000000 Z");
        assert_eq!(parse_wire_time(&formatted), Some(time));
    }

    #[test]
    fn test_wire_time_accepts_rfc3339() {
        let parsed = parse_wire_time("2024-03-09T14:05:07Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap());
        assert!(parse_wire_time("yesterday").is_none());
    }

    #[test]
    fn test_derived_status_precedence() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut record = FailureRecord {
            unique_message_id: "u1".to_string(),
            attempts: vec![attempt(t0)],
            status: FailedMessageStatus::Unresolved,
            failure_groups: vec![],
        };
        assert_eq!(record.derived_status(), MessageStatus::Failed);

        record.attempts.push(attempt(t0 + chrono::Duration::seconds(1)));
        assert_eq!(record.derived_status(), MessageStatus::RepeatedFailure);

        record.status = FailedMessageStatus::RetryIssued;
        assert_eq!(record.derived_status(), MessageStatus::RetryIssued);

        record.status = FailedMessageStatus::Resolved;
        assert_eq!(record.derived_status(), MessageStatus::Resolved);

        record.status = FailedMessageStatus::Archived;
        assert_eq!(record.derived_status(), MessageStatus::Archived);
    }
}
