//! Document store contract tests, run against every available backend.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use bp_store::{update_with_retry, DocumentStore, MemoryDocumentStore, StoreError, WriteOp};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Tally {
    values: Vec<u32>,
}

async fn check_commit_and_prefix(store: &dyn DocumentStore) {
    store
        .commit(vec![
            WriteOp::put("audit/2", &json!({"n": 2})).unwrap(),
            WriteOp::put("audit/1", &json!({"n": 1})).unwrap(),
            WriteOp::put("failed/1", &json!({"n": 3})).unwrap(),
        ])
        .await
        .unwrap();

    let audits = store.list_prefix("audit/").await.unwrap();
    let ids: Vec<&str> = audits.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["audit/1", "audit/2"]);

    store
        .commit(vec![WriteOp::delete("audit/1"), WriteOp::put("audit/2", &json!({"n": 20})).unwrap()])
        .await
        .unwrap();

    assert!(store.get("audit/1").await.unwrap().is_none());
    let doc = store.get("audit/2").await.unwrap().unwrap();
    assert_eq!(doc.body, json!({"n": 20}));
    assert_eq!(doc.version, 2);
}

async fn check_conditional_write(store: &dyn DocumentStore) {
    let v1 = store.put_if_version("failed/x", json!({"a": 1}), None).await.unwrap();
    assert_eq!(v1, 1);

    let err = store.put_if_version("failed/x", json!({"a": 2}), None).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let err = store.put_if_version("failed/x", json!({"a": 2}), Some(7)).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let v2 = store.put_if_version("failed/x", json!({"a": 2}), Some(1)).await.unwrap();
    assert_eq!(v2, 2);
    assert_eq!(store.get("failed/x").await.unwrap().unwrap().body, json!({"a": 2}));
}

async fn check_concurrent_updates(store: Arc<dyn DocumentStore>) {
    let mut handles = Vec::new();
    for n in 0..20u32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            update_with_retry::<Tally, _>(store.as_ref(), "failed/tally", 1000, |current| {
                let mut tally = current.unwrap_or_default();
                tally.values.push(n);
                Some(tally)
            })
            .await
            .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let tally: Tally = store.get("failed/tally").await.unwrap().unwrap().decode().unwrap();
    let mut values = tally.values;
    values.sort_unstable();
    assert_eq!(values, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_memory_commit_and_prefix() {
    check_commit_and_prefix(&MemoryDocumentStore::new()).await;
}

#[tokio::test]
async fn test_memory_conditional_write() {
    check_conditional_write(&MemoryDocumentStore::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_updates_are_not_lost() {
    check_concurrent_updates(Arc::new(MemoryDocumentStore::new())).await;
}

#[tokio::test]
async fn test_update_with_retry_can_skip_write() {
    let store = MemoryDocumentStore::new();
    let result = update_with_retry::<Tally, _>(&store, "failed/none", 3, |_| None)
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_update_with_retry_surfaces_persistent_conflict() {
    struct AlwaysConflict(MemoryDocumentStore);

    #[async_trait::async_trait]
    impl DocumentStore for AlwaysConflict {
        async fn init_schema(&self) -> bp_store::Result<()> {
            Ok(())
        }
        async fn commit(&self, ops: Vec<WriteOp>) -> bp_store::Result<()> {
            self.0.commit(ops).await
        }
        async fn get(&self, id: &str) -> bp_store::Result<Option<bp_store::Document>> {
            self.0.get(id).await
        }
        async fn put_if_version(
            &self,
            id: &str,
            _body: serde_json::Value,
            _expected: Option<u64>,
        ) -> bp_store::Result<u64> {
            Err(StoreError::Conflict(id.to_string()))
        }
        async fn list_prefix(&self, prefix: &str) -> bp_store::Result<Vec<bp_store::Document>> {
            self.0.list_prefix(prefix).await
        }
    }

    let store = AlwaysConflict(MemoryDocumentStore::new());
    let err = update_with_retry::<Tally, _>(&store, "failed/x", 2, |c| Some(c.unwrap_or_default()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(id) if id == "failed/x"));
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use bp_store::SqliteDocumentStore;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteDocumentStore {
        // single connection so every query sees the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteDocumentStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_sqlite_commit_and_prefix() {
        check_commit_and_prefix(&store().await).await;
    }

    #[tokio::test]
    async fn test_sqlite_conditional_write() {
        check_conditional_write(&store().await).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sqlite_concurrent_updates_are_not_lost() {
        check_concurrent_updates(Arc::new(store().await)).await;
    }
}
