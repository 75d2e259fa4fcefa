//! Subscription Log
//!
//! Durable append log backing the directory. Each entry carries the
//! message type as its body and `transportAddress|endpointName` as its label.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::Result;

pub type EntryId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub body: String,
    pub label: String,
    pub arrived_at: DateTime<Utc>,
}

#[async_trait]
pub trait SubscriptionLog: Send + Sync {
    async fn append(&self, body: &str, label: &str) -> Result<EntryId>;

    async fn list_all(&self) -> Result<Vec<LogEntry>>;

    /// Deleting an unknown id is not an error.
    async fn delete_by_id(&self, id: EntryId) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySubscriptionLog {
    inner: Mutex<MemoryLogState>,
}

#[derive(Default)]
struct MemoryLogState {
    next_id: EntryId,
    entries: BTreeMap<EntryId, LogEntry>,
}

impl MemorySubscriptionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append with an explicit arrival time, as when replaying an existing log.
    pub fn append_at(&self, body: &str, label: &str, arrived_at: DateTime<Utc>) -> EntryId {
        let mut state = self.inner.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.insert(
            id,
            LogEntry {
                id,
                body: body.to_string(),
                label: label.to_string(),
                arrived_at,
            },
        );
        id
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }
}

#[async_trait]
impl SubscriptionLog for MemorySubscriptionLog {
    async fn append(&self, body: &str, label: &str) -> Result<EntryId> {
        Ok(self.append_at(body, label, Utc::now()))
    }

    async fn list_all(&self) -> Result<Vec<LogEntry>> {
        Ok(self.inner.lock().entries.values().cloned().collect())
    }

    async fn delete_by_id(&self, id: EntryId) -> Result<()> {
        self.inner.lock().entries.remove(&id);
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSubscriptionLog;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use sqlx::{Row, SqlitePool};
    use tracing::info;

    pub struct SqliteSubscriptionLog {
        pool: SqlitePool,
    }

    impl SqliteSubscriptionLog {
        pub fn new(pool: SqlitePool) -> Self {
            Self { pool }
        }

        pub async fn init_schema(&self) -> Result<()> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS subscription_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    body TEXT NOT NULL,
                    label TEXT NOT NULL,
                    arrived_at INTEGER NOT NULL
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            info!("SQLite subscription log schema initialized");
            Ok(())
        }
    }

    #[async_trait]
    impl SubscriptionLog for SqliteSubscriptionLog {
        async fn append(&self, body: &str, label: &str) -> Result<EntryId> {
            let result = sqlx::query("INSERT INTO subscription_log (body, label, arrived_at) VALUES (?, ?, ?)")
                .bind(body)
                .bind(label)
                .bind(Utc::now().timestamp_micros())
                .execute(&self.pool)
                .await?;
            Ok(result.last_insert_rowid())
        }

        async fn list_all(&self) -> Result<Vec<LogEntry>> {
            let rows = sqlx::query("SELECT id, body, label, arrived_at FROM subscription_log ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

            Ok(rows
                .iter()
                .map(|row| {
                    let micros: i64 = row.get("arrived_at");
                    LogEntry {
                        id: row.get("id"),
                        body: row.get("body"),
                        label: row.get("label"),
                        arrived_at: DateTime::from_timestamp_micros(micros).unwrap_or_default(),
                    }
                })
                .collect())
        }

        async fn delete_by_id(&self, id: EntryId) -> Result<()> {
            sqlx::query("DELETE FROM subscription_log WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}
