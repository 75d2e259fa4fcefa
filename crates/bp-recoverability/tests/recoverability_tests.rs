use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use bp_common::{
    ExceptionDetails, FailedMessageStatus, FailureDetails, Headers, MessageMetadata, MessageStatus,
    ProcessingAttempt,
};
use bp_recoverability::{classify, default_classifiers, RecoverabilityError, RecoverabilityStore};
use bp_store::{DocumentStore, MemoryDocumentStore};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
}

fn attempt(secs: i64, message_type: &str) -> ProcessingAttempt {
    ProcessingAttempt {
        attempted_at: at(secs),
        headers: Headers::new(),
        failure: FailureDetails {
            exception: ExceptionDetails {
                exception_type: "System.TimeoutException".to_string(),
                message: format!("attempt {}", secs),
                source: None,
                stack_trace: "System.TimeoutException: late\n   at Shipping.Handler.Handle() in Handler.cs:line 4".to_string(),
            },
            time_of_failure: at(secs),
            address_of_failing_endpoint: "shipping@host".to_string(),
        },
        message_metadata: MessageMetadata {
            message_id: "msg".to_string(),
            message_intent: "Send".to_string(),
            message_type: Some(message_type.to_string()),
            is_system_message: false,
            sending_endpoint: Some("sales".to_string()),
            receiving_endpoint: Some("shipping".to_string()),
            conversation_id: None,
            time_sent: None,
            processing_started: None,
            processing_ended: None,
            processing_time_ms: None,
            critical_time_ms: None,
            content_type: "application/json".to_string(),
            body_size: 10,
            searchable_headers: String::new(),
            processed_at: at(secs),
        },
    }
}

fn store_with(max_attempts: usize) -> (Arc<MemoryDocumentStore>, RecoverabilityStore) {
    let docs = Arc::new(MemoryDocumentStore::new());
    let store = RecoverabilityStore::new(docs.clone() as Arc<dyn DocumentStore>, max_attempts, 1000);
    (docs, store)
}

#[tokio::test]
async fn test_single_attempt_is_failed_and_repeat_is_repeated_failure() {
    let (_, store) = store_with(10);
    let groups = classify(&default_classifiers(), &attempt(1, "Orders.Ship"));

    store.record_failed_attempt("u1", attempt(1, "Orders.Ship"), groups.clone()).await.unwrap();
    assert_eq!(store.get_view("u1").await.unwrap().unwrap().status, MessageStatus::Failed);

    store.record_failed_attempt("u1", attempt(2, "Orders.Ship"), groups).await.unwrap();
    let view = store.get_view("u1").await.unwrap().unwrap();
    assert_eq!(view.status, MessageStatus::RepeatedFailure);
    assert_eq!(view.attempt_count, 2);
    assert_eq!(view.failure_groups.len(), 3);
}

#[tokio::test]
async fn test_history_bounded_and_ordered() {
    let (_, store) = store_with(10);
    for secs in (0..15).rev() {
        store.record_failed_attempt("u1", attempt(secs, "T"), vec![]).await.unwrap();
    }
    let record = store.get("u1").await.unwrap().unwrap();
    assert_eq!(record.attempts.len(), 10);
    assert_eq!(record.attempts[0].attempted_at, at(5));
    assert_eq!(record.attempts[9].attempted_at, at(14));
}

#[tokio::test]
async fn test_successful_retry_resolves_regardless_of_attempts() {
    let (_, store) = store_with(10);
    for secs in 0..4 {
        store.record_failed_attempt("u1", attempt(secs, "T"), vec![]).await.unwrap();
    }
    store.request_retry("u1").await.unwrap();
    assert_eq!(store.pending_retries().await.unwrap().len(), 1);
    assert_eq!(store.get_view("u1").await.unwrap().unwrap().status, MessageStatus::RetryIssued);

    assert!(store.record_successful_retry("u1").await.unwrap());
    assert_eq!(store.get_view("u1").await.unwrap().unwrap().status, MessageStatus::Resolved);
    assert!(store.pending_retries().await.unwrap().is_empty());

    assert!(!store.record_successful_retry("unknown").await.unwrap());
    assert!(store.get("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_new_failure_after_retry_resets_to_unresolved() {
    let (_, store) = store_with(10);
    store.record_failed_attempt("u1", attempt(0, "T"), vec![]).await.unwrap();
    store.request_retry("u1").await.unwrap();
    let record = store.record_failed_attempt("u1", attempt(1, "T"), vec![]).await.unwrap();
    assert_eq!(record.status, FailedMessageStatus::Unresolved);
}

#[tokio::test]
async fn test_archive_lifecycle() {
    let (_, store) = store_with(10);
    store.record_failed_attempt("u1", attempt(0, "T"), vec![]).await.unwrap();

    store.archive("u1").await.unwrap();
    assert_eq!(store.get_view("u1").await.unwrap().unwrap().status, MessageStatus::Archived);

    let err = store.request_retry("u1").await.unwrap_err();
    assert!(matches!(err, RecoverabilityError::InvalidTransition { from: FailedMessageStatus::Archived, .. }));

    store.unarchive("u1").await.unwrap();
    assert_eq!(store.get_view("u1").await.unwrap().unwrap().status, MessageStatus::Failed);

    let err = store.archive("missing").await.unwrap_err();
    assert!(matches!(err, RecoverabilityError::NotFound(_)));
}

#[tokio::test]
async fn test_groups_summaries_and_group_archive() {
    let (_, store) = store_with(10);
    let classifiers = default_classifiers();
    for (id, message_type) in [("a", "Orders.Ship"), ("b", "Orders.Ship"), ("c", "Orders.Bill")] {
        let failed = attempt(1, message_type);
        let groups = classify(&classifiers, &failed);
        store.record_failed_attempt(id, failed, groups).await.unwrap();
    }

    let summaries = store.group_summaries().await.unwrap();
    // shared exception group and endpoint group cover all three
    assert_eq!(summaries[0].count, 3);
    let ship = summaries
        .iter()
        .find(|s| s.group.group_type == "Message Type" && s.group.title == "Orders.Ship")
        .unwrap();
    assert_eq!(ship.count, 2);

    let listed = store.list_group(&ship.group.id).await.unwrap();
    assert_eq!(listed.len(), 2);

    assert_eq!(store.archive_group(&ship.group.id).await.unwrap(), 2);
    let after = store.group_summaries().await.unwrap();
    assert!(after.iter().all(|s| s.group.id != ship.group.id));
    assert_eq!(after[0].count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_attempts_are_never_lost() {
    let (_, store) = store_with(100);
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for secs in 0..40 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.record_failed_attempt("hot", attempt(secs, "T"), vec![]).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = store.get("hot").await.unwrap().unwrap();
    assert_eq!(record.attempts.len(), 40);
    assert!(record.attempts.windows(2).all(|w| w[0].attempted_at < w[1].attempted_at));
}
