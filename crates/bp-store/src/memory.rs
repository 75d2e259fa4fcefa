//! In-memory document store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{Document, DocumentStore, Result, StoreError, WriteOp};

#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<BTreeMap<String, (serde_json::Value, u64)>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.lock().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut docs = self.docs.lock();
        for op in ops {
            match op {
                WriteOp::Put { id, body } => {
                    let version = docs.get(&id).map(|(_, v)| v + 1).unwrap_or(1);
                    docs.insert(id, (body, version));
                }
                WriteOp::Delete { id } => {
                    docs.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.lock().get(id).map(|(body, version)| Document {
            id: id.to_string(),
            body: body.clone(),
            version: *version,
        }))
    }

    async fn put_if_version(
        &self,
        id: &str,
        body: serde_json::Value,
        expected: Option<u64>,
    ) -> Result<u64> {
        let mut docs = self.docs.lock();
        let current = docs.get(id).map(|(_, v)| *v);
        if current != expected {
            return Err(StoreError::Conflict(id.to_string()));
        }
        let version = current.map(|v| v + 1).unwrap_or(1);
        docs.insert(id.to_string(), (body, version));
        Ok(version)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Document>> {
        let docs = self.docs.lock();
        Ok(docs
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .map(|(id, (body, version))| Document {
                id: id.clone(),
                body: body.clone(),
                version: *version,
            })
            .collect())
    }
}
