//! Canonical record factory
//!
//! Turns a staged record (headers + claim check) into the canonical audit
//! record committed to the store, computing metadata, the unique message id
//! and, for failed messages, the failure details.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use bp_common::headers;
use bp_common::{
    parse_wire_time, CanonicalAuditRecord, ClaimCheck, ExceptionDetails, FailureDetails, Headers,
    MessageMetadata, ProcessingAttempt, StagedRecord,
};
use bp_staging::BodyStorage;

const DEFAULT_INTENT: &str = "Send";

pub struct AuditRecordFactory {
    bodies: Option<Arc<dyn BodyStorage>>,
    max_body_size_to_inline: i32,
}

impl AuditRecordFactory {
    pub fn new(bodies: Option<Arc<dyn BodyStorage>>, max_body_size_to_inline: i32) -> Self {
        Self {
            bodies,
            max_body_size_to_inline,
        }
    }

    pub async fn build(&self, staged: StagedRecord) -> CanonicalAuditRecord {
        self.build_at(staged, Utc::now()).await
    }

    /// Build with `now` as the fallback processed-at time.
    pub async fn build_at(&self, staged: StagedRecord, now: DateTime<Utc>) -> CanonicalAuditRecord {
        let StagedRecord { headers, claim_check } = staged;

        let unique_message_id = unique_message_id(&headers, &claim_check);
        let metadata = build_metadata(&headers, &claim_check, now);
        let failure = failure_details(&headers, &metadata);
        let body = self.inline_body(&claim_check).await;

        CanonicalAuditRecord {
            unique_message_id,
            headers,
            metadata,
            body,
            failure,
        }
    }

    async fn inline_body(&self, claim_check: &ClaimCheck) -> Option<String> {
        let bodies = self.bodies.as_ref()?;
        if !claim_check.stored
            || claim_check.size > self.max_body_size_to_inline
            || !is_textual(&claim_check.content_type)
        {
            return None;
        }

        match bodies.fetch(&claim_check.message_id).await {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Some(text),
                Err(_) => {
                    debug!(message_id = %claim_check.message_id, "Body is not valid UTF-8, not inlining");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(message_id = %claim_check.message_id, error = %e, "Failed to fetch body for inlining");
                None
            }
        }
    }
}

/// Explicit unique id header if present, else a hash of message id and the
/// endpoint that processed (or failed to process) it.
pub fn unique_message_id(headers: &Headers, claim_check: &ClaimCheck) -> String {
    if let Some(explicit) = non_empty(headers, headers::UNIQUE_MESSAGE_ID) {
        return explicit.to_string();
    }

    let message_id = non_empty(headers, headers::MESSAGE_ID).unwrap_or(claim_check.message_id.as_str());
    let endpoint = non_empty(headers, headers::PROCESSING_ENDPOINT)
        .or_else(|| non_empty(headers, headers::FAILED_QUEUE))
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(message_id.as_bytes());
    hasher.update(endpoint.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

/// The failed attempt carried by a record, if it reports a failure.
pub fn processing_attempt(record: &CanonicalAuditRecord) -> Option<ProcessingAttempt> {
    let failure = record.failure.clone()?;
    Some(ProcessingAttempt {
        attempted_at: failure.time_of_failure,
        headers: record.headers.clone(),
        failure,
        message_metadata: record.metadata.clone(),
    })
}

fn build_metadata(headers: &Headers, claim_check: &ClaimCheck, now: DateTime<Utc>) -> MessageMetadata {
    let message_type = non_empty(headers, headers::ENCLOSED_MESSAGE_TYPES).and_then(first_message_type);
    let is_control = non_empty(headers, headers::CONTROL_MESSAGE)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let time_sent = time_header(headers, headers::TIME_SENT);
    let processing_started = time_header(headers, headers::PROCESSING_STARTED);
    let processing_ended = time_header(headers, headers::PROCESSING_ENDED);

    let processing_time_ms = match (processing_started, processing_ended) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
        _ => None,
    };
    let critical_time_ms = match (time_sent, processing_ended) {
        (Some(sent), Some(end)) => Some((end - sent).num_milliseconds()),
        _ => None,
    };

    let content_type = if claim_check.content_type.is_empty() {
        non_empty(headers, headers::CONTENT_TYPE).unwrap_or_default().to_string()
    } else {
        claim_check.content_type.clone()
    };

    MessageMetadata {
        message_id: non_empty(headers, headers::MESSAGE_ID)
            .unwrap_or(claim_check.message_id.as_str())
            .to_string(),
        message_intent: non_empty(headers, headers::MESSAGE_INTENT)
            .unwrap_or(DEFAULT_INTENT)
            .to_string(),
        is_system_message: is_control || message_type.is_none(),
        message_type,
        sending_endpoint: owned(headers, headers::ORIGINATING_ENDPOINT),
        receiving_endpoint: owned(headers, headers::PROCESSING_ENDPOINT),
        conversation_id: owned(headers, headers::CONVERSATION_ID),
        time_sent,
        processing_started,
        processing_ended,
        processing_time_ms,
        critical_time_ms,
        content_type,
        body_size: claim_check.size,
        searchable_headers: searchable_headers(headers),
        processed_at: processing_ended.unwrap_or(now),
    }
}

fn failure_details(headers: &Headers, metadata: &MessageMetadata) -> Option<FailureDetails> {
    let exception_type = non_empty(headers, headers::EXCEPTION_TYPE)?;

    Some(FailureDetails {
        exception: ExceptionDetails {
            exception_type: exception_type.to_string(),
            message: owned(headers, headers::EXCEPTION_MESSAGE).unwrap_or_default(),
            source: owned(headers, headers::EXCEPTION_SOURCE),
            stack_trace: owned(headers, headers::EXCEPTION_STACK_TRACE).unwrap_or_default(),
        },
        time_of_failure: time_header(headers, headers::TIME_OF_FAILURE).unwrap_or(metadata.processed_at),
        address_of_failing_endpoint: non_empty(headers, headers::FAILED_QUEUE)
            .or_else(|| non_empty(headers, headers::PROCESSING_ENDPOINT))
            .unwrap_or_default()
            .to_string(),
    })
}

/// `Ns.Type, Assembly, Version=...;Ns.Base, ...` -> `Ns.Type`
fn first_message_type(enclosed: &str) -> Option<String> {
    enclosed
        .split(';')
        .next()
        .and_then(|t| t.split(',').next())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn searchable_headers(headers: &Headers) -> String {
    let mut entries: Vec<(&String, &String)> = headers.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_textual(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("json") || content_type.contains("xml") || content_type.starts_with("text/")
}

fn non_empty<'a>(headers: &'a Headers, key: &str) -> Option<&'a str> {
    headers.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn owned(headers: &Headers, key: &str) -> Option<String> {
    non_empty(headers, key).map(str::to_string)
}

fn time_header(headers: &Headers, key: &str) -> Option<DateTime<Utc>> {
    let raw = non_empty(headers, key)?;
    let parsed = parse_wire_time(raw);
    if parsed.is_none() {
        debug!(header = %key, value = %raw, "Unparseable timestamp header");
    }
    parsed
}
